//! Entity matchers for the knowledge graph.
//!
//! Hand-rolled scanners rather than a regex dependency — the two patterns
//! here are simple enough that explicit loops are smaller and easier to
//! audit than a regex stack. Matchers are registered in [`MATCHERS`]; adding
//! an entity type means one new variant and one new function, no call-site
//! changes.

use std::collections::BTreeSet;

use super::EntityType;

/// Entity values shorter than this are noise and never enter the graph.
pub const MIN_VALUE_LEN: usize = 3;

type Matcher = fn(&str) -> Vec<String>;

pub const MATCHERS: &[(EntityType, Matcher)] =
    &[(EntityType::Email, find_emails), (EntityType::Url, find_urls)];

/// Scan a full document text once per registered matcher. Values are
/// deduplicated and length-filtered; output order is deterministic
/// (matcher order, then lexicographic within a type).
pub fn extract_entities(text: &str) -> Vec<(EntityType, String)> {
    let mut out = Vec::new();
    for (ty, matcher) in MATCHERS {
        let unique: BTreeSet<String> = matcher(text)
            .into_iter()
            .filter(|v| v.chars().count() >= MIN_VALUE_LEN)
            .collect();
        out.extend(unique.into_iter().map(|v| (*ty, v)));
    }
    out
}

fn is_email_local(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '%' | '+' | '-')
}

fn is_email_domain(c: char) -> bool {
    c.is_ascii_alphanumeric() || matches!(c, '.' | '-')
}

/// Find `local@domain.tld` occurrences by expanding around each `@`.
fn find_emails(text: &str) -> Vec<String> {
    let bytes = text.as_bytes();
    let mut out = Vec::new();
    for (at, _) in text.match_indices('@') {
        // expand left over local-part chars
        let mut start = at;
        while start > 0 && is_email_local(bytes[start - 1] as char) {
            start -= 1;
        }
        // expand right over domain chars
        let mut end = at + 1;
        while end < bytes.len() && is_email_domain(bytes[end] as char) {
            end += 1;
        }
        // trim trailing dots/hyphens left by sentence punctuation
        while end > at + 1 && matches!(bytes[end - 1] as char, '.' | '-') {
            end -= 1;
        }
        if start == at || end == at + 1 {
            continue;
        }
        let domain = &text[at + 1..end];
        // a real domain has a dot with label chars on both sides
        let Some(dot) = domain.rfind('.') else { continue };
        if dot == 0 || dot == domain.len() - 1 {
            continue;
        }
        out.push(text[start..end].to_ascii_lowercase());
    }
    out
}

fn is_url_char(c: char) -> bool {
    !c.is_whitespace() && !matches!(c, '<' | '>' | '"' | '\'' | ')' | ']' | '}')
}

/// Find `http://` / `https://` URLs, trimming trailing sentence punctuation.
fn find_urls(text: &str) -> Vec<String> {
    let mut out = Vec::new();
    for scheme in ["http://", "https://"] {
        for (start, _) in text.match_indices(scheme) {
            let rest = &text[start..];
            let end_rel = rest.find(|c: char| !is_url_char(c)).unwrap_or(rest.len());
            let mut candidate = &rest[..end_rel];
            while let Some(stripped) =
                candidate.strip_suffix(['.', ',', ';', ':', '!', '?'])
            {
                candidate = stripped;
            }
            // must have a host beyond the scheme
            if candidate.len() > scheme.len() {
                out.push(candidate.to_string());
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn finds_email_and_url_in_prose() {
        let found = extract_entities("Contact: a@b.com http://x.com");
        assert!(found.contains(&(EntityType::Email, "a@b.com".to_string())));
        assert!(found.contains(&(EntityType::Url, "http://x.com".to_string())));
    }

    #[test]
    fn email_trailing_punctuation_trimmed() {
        let found = find_emails("Mail me at jane.doe+tag@example.co.uk.");
        assert_eq!(found, vec!["jane.doe+tag@example.co.uk".to_string()]);
    }

    #[test]
    fn bare_at_sign_not_an_email() {
        assert!(find_emails("meet @ noon, or foo@bar (no tld)").is_empty());
        assert!(find_emails("@handle").is_empty());
    }

    #[test]
    fn emails_are_lowercased() {
        assert_eq!(find_emails("Admin@Example.COM"), vec!["admin@example.com".to_string()]);
    }

    #[test]
    fn url_stops_at_whitespace_and_brackets() {
        let found = find_urls("see (https://example.com/a?b=1) and http://plain.io, ok");
        assert_eq!(
            found,
            vec!["http://plain.io".to_string(), "https://example.com/a?b=1".to_string()]
        );
    }

    #[test]
    fn scheme_only_is_not_a_url() {
        assert!(find_urls("the prefix http:// alone").is_empty());
    }

    #[test]
    fn duplicates_collapse_within_one_document() {
        let found = extract_entities("a@b.com and again a@b.com");
        assert_eq!(found.len(), 1);
    }

    #[test]
    fn short_values_filtered() {
        // local+domain under the minimum length never appears in practice,
        // but the filter also guards future matchers; verify it holds.
        assert!(extract_entities("no entities here").is_empty());
    }
}

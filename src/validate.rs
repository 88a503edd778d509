use regex::Regex;
use std::sync::OnceLock;

/// Characters that must never appear in a free-text identifier that ends up
/// in a form value or a URL path segment.
const FORBIDDEN_IDENTITY_CHARS: &[char] = &[
    ':', ';', '/', '\'', '"', '\\', '|', ',', '<', '>', '?', '*',
];

/// Ordered exactly as the target UI renders its role options; `role_rank`
/// turns the Nth entry into option index N. The contract is positional, not
/// symbolic: if the UI ever reorders its option list, this table has to be
/// updated in lock step or the wrong option gets selected silently.
pub const ROLE_OPTIONS: &[&str] = &["sub agent", "agent", "ticketing agent", "administrator"];

const ROLE_SYNONYMS: &[(&str, &str)] = &[
    ("sub-agent", "sub agent"),
    ("subagent", "sub agent"),
    ("ticket agent", "ticketing agent"),
    ("ticketing-agent", "ticketing agent"),
    ("admin", "administrator"),
];

fn email_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$")
            .expect("email pattern is valid")
    })
}

/// Rejects empty tokens and tokens containing whitespace or shell/URL
/// metacharacters.
pub fn validate_identity(token: &str) -> bool {
    let token = token.trim();
    if token.is_empty() {
        return false;
    }
    !token
        .chars()
        .any(|ch| ch.is_whitespace() || FORBIDDEN_IDENTITY_CHARS.contains(&ch))
}

/// Purely syntactic `local@domain.tld` check; no DNS or deliverability
/// verification.
pub fn validate_email(token: &str) -> bool {
    email_pattern().is_match(token.trim())
}

/// Case- and whitespace-insensitive synonym lookup. Unrecognized input passes
/// through lower-cased and trimmed so `role_rank` can flag it as unknown.
pub fn normalize_role(text: &str) -> String {
    let folded = text
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
        .to_lowercase();
    for (synonym, canonical) in ROLE_SYNONYMS {
        if folded == *synonym {
            return (*canonical).to_string();
        }
    }
    folded
}

/// 1-based position of a canonical role in the fixed option list; 0 for any
/// value not in the list.
pub fn role_rank(canonical: &str) -> usize {
    ROLE_OPTIONS
        .iter()
        .position(|role| *role == canonical)
        .map(|idx| idx + 1)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn identity_rejects_empty_and_metacharacters() {
        assert!(!validate_identity(""));
        assert!(!validate_identity("   "));
        assert!(!validate_identity("user name"));
        assert!(!validate_identity("user;name"));
        assert!(!validate_identity("user/name"));
        assert!(!validate_identity("user|name"));
        assert!(validate_identity("user.name-01"));
        assert!(validate_identity("  padded_ok  "));
    }

    #[test]
    fn email_requires_local_domain_and_tld() {
        assert!(validate_email("a.person+tag@example.co"));
        assert!(validate_email("  trimmed@example.com  "));
        assert!(!validate_email("missing-at.example.com"));
        assert!(!validate_email("no-tld@example"));
        assert!(!validate_email("two words@example.com"));
        assert!(!validate_email(""));
    }

    #[test]
    fn role_synonyms_collapse_to_one_canonical_value() {
        assert_eq!(normalize_role("Ticket Agent"), "ticketing agent");
        assert_eq!(normalize_role("ticketing agent"), "ticketing agent");
        assert_eq!(
            normalize_role("  TICKETING   AGENT  "),
            "ticketing agent"
        );
        assert_eq!(normalize_role("Admin"), "administrator");
    }

    #[test]
    fn unknown_roles_pass_through_lowercased() {
        assert_eq!(normalize_role("  Night Auditor "), "night auditor");
        assert_eq!(role_rank("night auditor"), 0);
    }

    #[test]
    fn role_rank_matches_fixed_option_order() {
        assert_eq!(role_rank("sub agent"), 1);
        assert_eq!(role_rank("agent"), 2);
        assert_eq!(role_rank(&normalize_role("Ticket Agent")), 3);
        assert_eq!(role_rank("administrator"), 4);
        assert_eq!(role_rank(""), 0);
    }
}

use anyhow::{Result, anyhow};

pub const MAX_WALLET_ADDRESS_LEN: usize = 128;
pub const MAX_EMAIL_LEN: usize = 254;
pub const MAX_TWITTER_HANDLE_LEN: usize = 64;
pub const MIN_REFERRAL_CODE_LEN: usize = 6;
pub const MAX_REFERRAL_CODE_LEN: usize = 32;

/// Wallets are stored and compared in lowercase so that checksummed and
/// plain hex forms of the same address resolve to one row.
pub fn canonical_wallet(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Wallet address cannot be empty"));
    }
    if trimmed.len() > MAX_WALLET_ADDRESS_LEN {
        return Err(anyhow!(
            "Wallet address exceeds {MAX_WALLET_ADDRESS_LEN} character limit"
        ));
    }
    if trimmed.chars().any(char::is_whitespace) {
        return Err(anyhow!("Wallet address cannot contain whitespace"));
    }
    Ok(trimmed.to_ascii_lowercase())
}

pub fn wallets_match(left: &str, right: &str) -> bool {
    let left = left.trim();
    let right = right.trim();
    !left.is_empty() && left.eq_ignore_ascii_case(right)
}

/// Admin status is derived on every call from the session wallet; it is a
/// display gate for the client and an authorization check for `/admin`.
pub fn is_admin(address: Option<&str>, admin_wallet: &str) -> bool {
    address.is_some_and(|address| wallets_match(address, admin_wallet))
}

pub fn validate_email(value: &str) -> Result<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Email is required"));
    }
    if trimmed.len() > MAX_EMAIL_LEN {
        return Err(anyhow!("Email exceeds {MAX_EMAIL_LEN} character limit"));
    }
    let Some((local, domain)) = trimmed.split_once('@') else {
        return Err(anyhow!("Email must contain '@'"));
    };
    if local.is_empty() || domain.is_empty() || domain.contains('@') {
        return Err(anyhow!("Email address is malformed"));
    }
    if !domain.contains('.') || domain.starts_with('.') || domain.ends_with('.') {
        return Err(anyhow!("Email domain is malformed"));
    }
    Ok(trimmed.to_string())
}

pub fn normalize_twitter_handle(value: &str) -> Result<String> {
    let handle: String = value.trim().chars().filter(|c| *c != '@').collect();
    if handle.is_empty() {
        return Err(anyhow!("Twitter username is required"));
    }
    if handle.chars().count() > MAX_TWITTER_HANDLE_LEN {
        return Err(anyhow!(
            "Twitter username exceeds {MAX_TWITTER_HANDLE_LEN} character limit"
        ));
    }
    if handle.chars().any(char::is_whitespace) {
        return Err(anyhow!("Twitter username cannot contain whitespace"));
    }
    Ok(handle)
}

pub fn normalize_referral_code(value: &str) -> String {
    value.trim().to_ascii_uppercase()
}

/// Returns the code worth looking up, or `None` when it is too short or too
/// long to ever match a generated code.
pub fn referral_code_candidate(value: &str) -> Option<String> {
    let normalized = normalize_referral_code(value);
    let len = normalized.chars().count();
    if !(MIN_REFERRAL_CODE_LEN..=MAX_REFERRAL_CODE_LEN).contains(&len) {
        return None;
    }
    if !normalized.chars().all(|c| c.is_ascii_alphanumeric()) {
        return None;
    }
    Some(normalized)
}

pub fn referral_link(base_url: &str, code: &str) -> String {
    format!("{}?ref={}", base_url.trim_end_matches('/'), code)
}

/// Parses a point value typed by the admin.
pub fn parse_points(raw: &str) -> Result<i64> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(anyhow!("Points value is required"));
    }
    trimmed
        .parse::<i64>()
        .map_err(|_| anyhow!("Invalid points value: {trimmed}"))
}

pub trait LeaderboardEntry {
    fn wallet(&self) -> &str;
    fn twitter_username(&self) -> &str;
}

/// Keeps the entries whose wallet or twitter handle contains `term`,
/// ignoring case. Input order is preserved.
pub fn filter_leaderboard<'a, T: LeaderboardEntry>(entries: &'a [T], term: &str) -> Vec<&'a T> {
    let needle = term.trim().to_lowercase();
    if needle.is_empty() {
        return entries.iter().collect();
    }
    entries
        .iter()
        .filter(|entry| {
            entry.wallet().to_lowercase().contains(&needle)
                || entry.twitter_username().to_lowercase().contains(&needle)
        })
        .collect()
}

pub fn shorten_address(address: &str) -> String {
    let chars: Vec<char> = address.chars().collect();
    if chars.len() <= 10 {
        return address.to_string();
    }
    let head: String = chars[..6].iter().collect();
    let tail: String = chars[chars.len() - 4..].iter().collect();
    format!("{head}...{tail}")
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Row {
        wallet: &'static str,
        twitter: &'static str,
    }

    impl LeaderboardEntry for Row {
        fn wallet(&self) -> &str {
            self.wallet
        }

        fn twitter_username(&self) -> &str {
            self.twitter
        }
    }

    #[test]
    fn wallet_is_lowercased() {
        assert_eq!(
            canonical_wallet("  0xABCdef  ").unwrap(),
            "0xabcdef".to_string()
        );
        assert!(canonical_wallet("   ").is_err());
        assert!(canonical_wallet("0x ab").is_err());
        let too_long = "a".repeat(MAX_WALLET_ADDRESS_LEN + 1);
        assert!(canonical_wallet(&too_long).is_err());
    }

    #[test]
    fn admin_comparison_ignores_case() {
        let admin = "0x6bA6285C16880fbACED253C48B5F575C429fD884";
        assert!(is_admin(
            Some("0x6ba6285c16880fbaced253c48b5f575c429fd884"),
            admin
        ));
        assert!(!is_admin(Some("0x0000"), admin));
        assert!(!is_admin(None, admin));
        assert!(!is_admin(Some(""), ""));
    }

    #[test]
    fn email_validation() {
        assert_eq!(validate_email(" a@b.io ").unwrap(), "a@b.io");
        assert!(validate_email("").is_err());
        assert!(validate_email("nobody").is_err());
        assert!(validate_email("@b.io").is_err());
        assert!(validate_email("a@b@c.io").is_err());
        assert!(validate_email("a@localhost").is_err());
    }

    #[test]
    fn twitter_handle_strips_at() {
        assert_eq!(normalize_twitter_handle("@reva_nft").unwrap(), "reva_nft");
        assert!(normalize_twitter_handle("@").is_err());
        assert!(normalize_twitter_handle("two words").is_err());
    }

    #[test]
    fn short_codes_are_not_candidates() {
        assert_eq!(referral_code_candidate("abc"), None);
        assert_eq!(referral_code_candidate(" revx9k2m "), Some("REVX9K2M".into()));
        assert_eq!(referral_code_candidate("REV-9K2M"), None);
        let long = "A".repeat(MAX_REFERRAL_CODE_LEN + 1);
        assert_eq!(referral_code_candidate(&long), None);
    }

    #[test]
    fn points_parsing() {
        assert_eq!(parse_points(" 1500 ").unwrap(), 1500);
        assert_eq!(parse_points("-20").unwrap(), -20);
        assert!(parse_points("12abc").is_err());
        assert!(parse_points("").is_err());
        assert!(parse_points("1.5").is_err());
    }

    #[test]
    fn leaderboard_search_matches_either_field() {
        let rows = [
            Row {
                wallet: "0xAAA111",
                twitter: "alice",
            },
            Row {
                wallet: "0xbbb222",
                twitter: "Bob_AAA",
            },
            Row {
                wallet: "0xccc333",
                twitter: "carol",
            },
        ];

        let hits = filter_leaderboard(&rows, "aaa");
        let wallets: Vec<&str> = hits.iter().map(|row| row.wallet).collect();
        assert_eq!(wallets, vec!["0xAAA111", "0xbbb222"]);

        assert_eq!(filter_leaderboard(&rows, "CAROL").len(), 1);
        assert_eq!(filter_leaderboard(&rows, "  ").len(), 3);
        assert!(filter_leaderboard(&rows, "zzz").is_empty());
    }

    #[test]
    fn address_shortening() {
        assert_eq!(
            shorten_address("0x6bA6285C16880fbACED253C48B5F575C429fD884"),
            "0x6bA6...D884"
        );
        assert_eq!(shorten_address("0x1234"), "0x1234");
    }

    #[test]
    fn referral_link_format() {
        assert_eq!(
            referral_link("https://noxara.xyz/", "REVX9K2M"),
            "https://noxara.xyz?ref=REVX9K2M"
        );
    }
}

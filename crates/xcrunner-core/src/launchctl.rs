//! Parsing of simulator process and app listings.
//!
//! `xcrun simctl spawn <device> launchctl list` prints one header line and
//! then one row per launchd job:
//!
//! ```text
//! PID     Status  Label
//! 1234    0       UIKitApplication:com.example.app[0x1a2b][rb-legacy]
//! -       0       com.apple.assistivetouchd
//! ```
//!
//! Application rows sometimes carry a `UIKitApplication:` prefix and a
//! bracketed decoration suffix; [`normalize_label`] strips both so the label
//! matches the app's bundle identifier. Rows with more than three
//! whitespace-separated fields are multi-word service descriptions and are
//! dropped, even though that also drops any app whose label contains
//! whitespace.
//!
//! The installed-app listing arrives as JSON keyed by bundle identifier; only
//! the keys are kept.

use std::collections::{BTreeSet, HashMap};

use serde::de::IgnoredAny;

/// Prefix some iOS versions put in front of application job labels.
pub const UIKIT_APPLICATION_PREFIX: &str = "UIKitApplication:";

/// Rows with more fields than this are treated as noise.
const MAX_FIELDS: usize = 3;

/// One row of a process listing after normalization.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessRecord {
    /// Normalized job label (the bundle identifier for apps).
    pub identifier: String,
    /// Process id, or `None` when the job is loaded but not running.
    pub pid: Option<u32>,
}

/// Normalizes a launchd job label to the identifier it names.
///
/// Everything from the first `[` on is dropped, then any leading
/// `UIKitApplication:` markers are removed. Applying it twice gives the same
/// result as applying it once.
///
/// ```
/// use xcrunner_core::launchctl::normalize_label;
///
/// let label = "UIKitApplication:com.example.app[0x5c1][rb-legacy]";
/// assert_eq!(normalize_label(label), "com.example.app");
/// assert_eq!(normalize_label("com.apple.backboardd"), "com.apple.backboardd");
/// ```
pub fn normalize_label(label: &str) -> String {
    let head = label.split_once('[').map_or(label, |(head, _)| head);
    head.trim_start_matches(UIKIT_APPLICATION_PREFIX).to_string()
}

/// Parses one listing row. Returns `None` for rows that are not a job entry.
fn parse_row(line: &str) -> Option<ProcessRecord> {
    let fields: Vec<&str> = line.split_whitespace().collect();
    if fields.len() < 2 || fields.len() > MAX_FIELDS {
        return None;
    }
    let pid = fields.first().and_then(|raw| raw.parse::<u32>().ok());
    let label = fields.last()?;
    Some(ProcessRecord {
        identifier: normalize_label(label),
        pid,
    })
}

/// Parses raw `launchctl list` output into records, in listing order.
///
/// The first line is the header and is always skipped.
pub fn parse_records(raw: &str) -> Vec<ProcessRecord> {
    raw.lines().skip(1).filter_map(parse_row).collect()
}

/// Parses raw `launchctl list` output into a map from identifier to pid.
///
/// When two rows normalize to the same identifier the later row wins.
pub fn parse_running_apps(raw: &str) -> HashMap<String, Option<u32>> {
    parse_records(raw)
        .into_iter()
        .map(|record| (record.identifier, record.pid))
        .collect()
}

/// Parses the JSON form of `simctl listapps` into the set of bundle identifiers.
///
/// Empty (or whitespace-only) input means no apps and is not an error.
///
/// # Errors
///
/// Returns the decode error for non-empty input that is not a JSON object.
pub fn parse_installed_apps(json: &str) -> Result<BTreeSet<String>, serde_json::Error> {
    if json.trim().is_empty() {
        return Ok(BTreeSet::new());
    }
    let apps: HashMap<String, IgnoredAny> = serde_json::from_str(json)?;
    Ok(apps.into_keys().collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    // Trimmed capture from an iOS 17 simulator.
    const LAUNCHCTL_SAMPLE: &str = "\
PID\tStatus\tLabel
-\t0\tcom.apple.assistivetouchd
412\t0\tcom.apple.backboardd
9071\t0\tUIKitApplication:com.example.shop[8f1e][rb-legacy]
-\t0\tUIKitApplication:com.apple.Preferences[a0c3][rb-legacy]
5521\t-9\tcom.apple.mobile.installd
-\t0\tcom.apple.CoreSimulator.bridge Simulator Bridge Service
";

    #[test]
    fn normalize_strips_prefix_and_suffix() {
        assert_eq!(
            normalize_label("UIKitApplication:com.example.shop[8f1e][rb-legacy]"),
            "com.example.shop"
        );
    }

    #[test]
    fn normalize_strips_suffix_without_prefix() {
        assert_eq!(normalize_label("com.example.shop[8f1e]"), "com.example.shop");
    }

    #[test]
    fn normalize_strips_prefix_without_suffix() {
        assert_eq!(
            normalize_label("UIKitApplication:com.example.shop"),
            "com.example.shop"
        );
    }

    #[test]
    fn normalize_is_identity_for_plain_labels() {
        for label in ["com.apple.backboardd", "x", "", "com.example.app.extension"] {
            assert_eq!(normalize_label(label), label);
        }
    }

    #[test]
    fn normalize_is_idempotent() {
        for label in [
            "UIKitApplication:com.example.shop[8f1e][rb-legacy]",
            "UIKitApplication:UIKitApplication:com.example.shop",
            "com.apple.backboardd",
            "[only-suffix]",
            "UIKitApplication:",
        ] {
            let once = normalize_label(label);
            assert_eq!(normalize_label(&once), once, "label {label:?}");
        }
    }

    #[test]
    fn parse_skips_header_and_long_rows() {
        let apps = parse_running_apps(LAUNCHCTL_SAMPLE);

        assert_eq!(apps.len(), 5);
        assert!(!apps.contains_key("Label"));
        assert!(!apps.contains_key("com.apple.CoreSimulator.bridge"));
        assert!(!apps.contains_key("Service"));
    }

    #[test]
    fn parse_reads_pids_and_dashes() {
        let apps = parse_running_apps(LAUNCHCTL_SAMPLE);

        assert_eq!(apps.get("com.example.shop"), Some(&Some(9071)));
        assert_eq!(apps.get("com.apple.backboardd"), Some(&Some(412)));
        assert_eq!(apps.get("com.apple.Preferences"), Some(&None));
        assert_eq!(apps.get("com.apple.assistivetouchd"), Some(&None));
        assert_eq!(apps.get("com.apple.mobile.installd"), Some(&Some(5521)));
    }

    #[test]
    fn parse_accepts_two_field_rows() {
        let raw = "PID Label\n77 com.example.two\n- com.example.idle\n";
        let apps = parse_running_apps(raw);

        assert_eq!(apps.get("com.example.two"), Some(&Some(77)));
        assert_eq!(apps.get("com.example.idle"), Some(&None));
    }

    #[test]
    fn parse_later_rows_overwrite_earlier() {
        let raw = "\
PID\tStatus\tLabel
100\t0\tUIKitApplication:com.example.shop[aaaa]
200\t0\tcom.example.shop
";
        let apps = parse_running_apps(raw);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps.get("com.example.shop"), Some(&Some(200)));
    }

    #[test]
    fn parse_records_keeps_listing_order() {
        let records = parse_records(LAUNCHCTL_SAMPLE);
        let ids: Vec<&str> = records.iter().map(|r| r.identifier.as_str()).collect();
        assert_eq!(
            ids,
            [
                "com.apple.assistivetouchd",
                "com.apple.backboardd",
                "com.example.shop",
                "com.apple.Preferences",
                "com.apple.mobile.installd",
            ]
        );
    }

    #[test]
    fn parse_ignores_blank_and_single_field_lines() {
        let raw = "PID\tStatus\tLabel\n\n   \nstray\n12\t0\tcom.example.app\n";
        let apps = parse_running_apps(raw);
        assert_eq!(apps.len(), 1);
        assert_eq!(apps.get("com.example.app"), Some(&Some(12)));
    }

    #[test]
    fn parse_handles_header_only_and_empty_output() {
        assert!(parse_running_apps("").is_empty());
        assert!(parse_running_apps("PID\tStatus\tLabel\n").is_empty());
    }

    #[test]
    fn parse_header_is_dropped_even_if_it_looks_like_a_row() {
        let raw = "1 0 com.example.first\n2 0 com.example.second\n";
        let apps = parse_running_apps(raw);
        assert!(!apps.contains_key("com.example.first"));
        assert!(apps.contains_key("com.example.second"));
    }

    #[test]
    fn installed_apps_empty_input_is_empty_set() {
        assert!(parse_installed_apps("").unwrap().is_empty());
        assert!(parse_installed_apps("  \n").unwrap().is_empty());
    }

    #[test]
    fn installed_apps_returns_exactly_the_keys() {
        let json = r#"{
            "com.apple.mobilesafari": {"ApplicationType": "System", "CFBundleName": "Safari"},
            "com.example.shop": {"ApplicationType": "User", "Path": "/tmp/Shop.app"},
            "com.apple.Preferences": {}
        }"#;
        let apps = parse_installed_apps(json).unwrap();

        assert_eq!(apps.len(), 3);
        assert!(apps.contains("com.apple.mobilesafari"));
        assert!(apps.contains("com.example.shop"));
        assert!(apps.contains("com.apple.Preferences"));
    }

    #[test]
    fn installed_apps_rejects_malformed_json() {
        assert!(parse_installed_apps("{not json").is_err());
        assert!(parse_installed_apps("[\"com.example.shop\"]").is_err());
    }
}

//! Coarse device/browser labels derived from a raw `User-Agent` string.

pub const UNKNOWN_DEVICE: &str = "Unknown device";
pub const UNKNOWN_BROWSER: &str = "Unknown browser";

/// Upper bound, in characters, of the stored browser label.
pub const BROWSER_LABEL_MAX_CHARS: usize = 120;

/// Checked in order; the first matching token decides the device.
/// Phone and tablet tokens come before the generic `mobile` marker,
/// desktop systems after it.
const DEVICE_RULES: &[(&str, &str)] = &[
    ("iphone", "iPhone"),
    ("ipad", "iPad"),
    ("android", "Android"),
    ("windows phone", "Windows Phone"),
    ("mobile", "Mobile"),
    ("windows", "Windows"),
    ("macintosh", "Mac"),
    ("mac os", "Mac"),
    ("cros", "ChromeOS"),
    ("linux", "Linux"),
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClientLabels {
    pub device: String,
    pub browser: String,
}

pub fn classify(raw: Option<&str>) -> ClientLabels {
    let raw = raw.map(str::trim).filter(|value| !value.is_empty());
    let Some(raw) = raw else {
        return ClientLabels {
            device: UNKNOWN_DEVICE.to_string(),
            browser: UNKNOWN_BROWSER.to_string(),
        };
    };

    let lowered = raw.to_lowercase();
    let device = DEVICE_RULES
        .iter()
        .find(|(token, _)| lowered.contains(token))
        .map(|(_, label)| *label)
        .unwrap_or(UNKNOWN_DEVICE);

    ClientLabels {
        device: device.to_string(),
        browser: raw.chars().take(BROWSER_LABEL_MAX_CHARS).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_or_blank_agent_is_unknown() {
        for input in [None, Some(""), Some("   ")] {
            let labels = classify(input);
            assert_eq!(labels.device, UNKNOWN_DEVICE);
            assert_eq!(labels.browser, UNKNOWN_BROWSER);
        }
    }

    #[test]
    fn phones_win_over_generic_mobile() {
        let iphone = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) Mobile/15E148";
        assert_eq!(classify(Some(iphone)).device, "iPhone");

        let android = "Mozilla/5.0 (Linux; Android 14; Pixel 8) Mobile Safari/537.36";
        assert_eq!(classify(Some(android)).device, "Android");

        assert_eq!(classify(Some("SomeBrowser Mobile")).device, "Mobile");
    }

    #[test]
    fn desktop_systems() {
        let windows = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) Chrome/126.0";
        assert_eq!(classify(Some(windows)).device, "Windows");

        let mac = "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_5) Safari/605.1.15";
        assert_eq!(classify(Some(mac)).device, "Mac");

        let linux = "Mozilla/5.0 (X11; Linux x86_64) Firefox/127.0";
        assert_eq!(classify(Some(linux)).device, "Linux");

        assert_eq!(classify(Some("curl/8.5.0")).device, UNKNOWN_DEVICE);
    }

    #[test]
    fn browser_label_is_truncated_on_char_boundary() {
        let long = "ü".repeat(BROWSER_LABEL_MAX_CHARS + 30);
        let labels = classify(Some(&long));
        assert_eq!(labels.browser.chars().count(), BROWSER_LABEL_MAX_CHARS);

        assert_eq!(classify(Some("curl/8.5.0")).browser, "curl/8.5.0");
    }
}

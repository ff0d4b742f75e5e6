use chrono::Utc;
use rand::{distributions::Alphanumeric, Rng};

/// Generate a URL-safe alphanumeric identifier
pub fn random_string(length: usize) -> String {
    rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(length)
        .map(char::from)
        .collect()
}

/// Current unix timestamp in seconds
pub fn now_unix() -> i64 {
    Utc::now().timestamp()
}

/// Human-readable size using 1024-based units, e.g. "1.5 MB"
pub fn byte_count_si(bytes: u64) -> String {
    const UNIT: u64 = 1024;
    if bytes < UNIT {
        return format!("{} B", bytes);
    }
    let mut div = UNIT;
    let mut exp = 0;
    let mut n = bytes / UNIT;
    while n >= UNIT {
        div *= UNIT;
        exp += 1;
        n /= UNIT;
    }
    let prefix = ['k', 'M', 'G', 'T', 'P', 'E'][exp];
    format!("{:.1} {}B", bytes as f64 / div as f64, prefix)
}

/// Drop control characters, which can never appear in a header value
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .filter(|c| !c.is_control())
        .collect::<String>()
        .trim()
        .to_string()
}

/// Content-Disposition with an ASCII fallback name and the percent-encoded
/// UTF-8 name. The result is always a valid header value.
pub fn content_disposition(file_name: &str, force_download: bool) -> String {
    let kind = if force_download { "attachment" } else { "inline" };
    let fallback: String = file_name
        .chars()
        .map(|c| match c {
            '"' | '\\' => '_',
            c if c == ' ' || c.is_ascii_graphic() => c,
            _ => '_',
        })
        .collect();
    format!(
        "{}; filename=\"{}\"; filename*=UTF-8''{}",
        kind,
        fallback,
        urlencoding::encode(file_name)
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_string() {
        let a = random_string(15);
        let b = random_string(15);
        assert_eq!(a.len(), 15);
        assert!(a.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(a, b);
        assert!(random_string(0).is_empty());
    }

    #[test]
    fn test_byte_count_si() {
        assert_eq!(byte_count_si(0), "0 B");
        assert_eq!(byte_count_si(1023), "1023 B");
        assert_eq!(byte_count_si(1024), "1.0 kB");
        assert_eq!(byte_count_si(1536), "1.5 kB");
        assert_eq!(byte_count_si(5 * 1024 * 1024), "5.0 MB");
        assert_eq!(byte_count_si(3 * 1024 * 1024 * 1024), "3.0 GB");
    }

    #[test]
    fn test_sanitize_file_name() {
        assert_eq!(sanitize_file_name("a\nb.txt"), "ab.txt");
        assert_eq!(sanitize_file_name(" \u{7f}report\t.pdf "), "report.pdf");
        assert_eq!(sanitize_file_name("naïve.txt"), "naïve.txt");
        assert!(sanitize_file_name("\r\n").is_empty());
    }

    #[test]
    fn test_content_disposition() {
        assert_eq!(
            content_disposition("a \"b\".txt", true),
            "attachment; filename=\"a _b_.txt\"; filename*=UTF-8''a%20%22b%22.txt"
        );
        assert_eq!(
            content_disposition("naïve\n.png", false),
            "inline; filename=\"na_ve_.png\"; filename*=UTF-8''na%C3%AFve%0A.png"
        );
        for name in ["a\nb.txt", "ünïcödé.bin", "tab\there", "\u{7f}"] {
            let value = content_disposition(name, true);
            assert!(axum::http::HeaderValue::from_str(&value).is_ok(), "{}", value);
        }
    }
}

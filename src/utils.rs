use anyhow::Result;
use url::Url;

/// Derives a filename from the URL's path component. Query and fragment
/// never leak into the name; an empty path falls back to a generated
/// name so two anonymous downloads cannot collide.
pub fn filename_from_url(url_str: &str) -> Result<String> {
    let url = Url::parse(url_str)?;

    if let Some(segments) = url.path_segments() {
        if let Some(filename) = segments.last() {
            if !filename.is_empty() {
                return Ok(filename.to_string());
            }
        }
    }

    Ok(format!("download_{}", uuid::Uuid::new_v4()))
}

pub fn sanitize_filename(filename: &str) -> String {
    filename.replace(
        |c: char| !c.is_alphanumeric() && c != '.' && c != '-' && c != '_',
        "_",
    )
}

/// Formats an ETA for display. `None` renders as `--`, the explicit
/// "unknown" value.
pub fn format_eta(eta_seconds: Option<f64>) -> String {
    let seconds = match eta_seconds {
        Some(s) if s.is_finite() && s >= 0.0 => s as u64,
        _ => return "--".into(),
    };
    let h = seconds / 3600;
    let m = (seconds % 3600) / 60;
    let s = seconds % 60;
    if h > 0 {
        format!("{h}h {m:02}m {s:02}s")
    } else if m > 0 {
        format!("{m}m {s:02}s")
    } else {
        format!("{s}s")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn filename_ignores_query_and_fragment() {
        let name = filename_from_url("https://example.com/a/b/file.zip?token=abc#frag").unwrap();
        assert_eq!(name, "file.zip");
    }

    #[test]
    fn empty_path_gets_generated_name() {
        let name = filename_from_url("https://example.com/").unwrap();
        assert!(name.starts_with("download_"));
    }

    #[test]
    fn invalid_url_is_an_error() {
        assert!(filename_from_url("not a url").is_err());
    }

    #[test]
    fn sanitize_replaces_path_separators() {
        assert_eq!(sanitize_filename("a/b\\c file.bin"), "a_b_c_file.bin");
    }

    #[test]
    fn eta_formatting() {
        assert_eq!(format_eta(None), "--");
        assert_eq!(format_eta(Some(-3.0)), "--");
        assert_eq!(format_eta(Some(f64::INFINITY)), "--");
        assert_eq!(format_eta(Some(0.0)), "0s");
        assert_eq!(format_eta(Some(42.9)), "42s");
        assert_eq!(format_eta(Some(125.0)), "2m 05s");
        assert_eq!(format_eta(Some(3723.0)), "1h 02m 03s");
    }
}

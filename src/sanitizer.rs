//! HTML rewriting applied to every captured page
//!
//! Two pure transformations: a `<base>` tag so relative asset references keep
//! resolving against the original origin, and removal of every `<script>`
//! element. Both are regex approximations of what an HTML tokenizer would do;
//! they never fail and tolerate malformed or partial documents.

use chrono::{DateTime, SecondsFormat, Utc};
use regex::Regex;
use std::sync::OnceLock;

/// Generator tag written into every provenance comment.
pub const GENERATOR_TAG: &str = "Generated by Page Snapshot Service";

fn head_open_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // `<head>` or `<head attr=...>`, never `<header>`.
    RE.get_or_init(|| Regex::new(r"(?i)<head(?:\s[^>]*)?>").expect("valid head regex"))
}

fn script_element_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // Script data ends at the first closing tag, as in the HTML tokenizer.
    // An opening tag without any closing tag swallows the rest of the input.
    RE.get_or_init(|| {
        Regex::new(r"(?is)<script\b[^>]*>(?:.*?</script\s*>|.*\z)").expect("valid script regex")
    })
}

/// Rewrite captured markup: strip scripts, then anchor relative URLs to `url`.
///
/// Idempotent: `sanitize_html(&sanitize_html(h, u), u) == sanitize_html(h, u)`.
pub fn sanitize_html(html: &str, url: &str) -> String {
    let stripped = strip_scripts(html);
    inject_base_tag(&stripped, url)
}

/// Insert `<base href="{url}" />` as the first child of `<head>`.
///
/// A document without a head gets one synthesized in front of it. Input whose
/// head already starts with the same base tag is returned unchanged.
pub fn inject_base_tag(html: &str, url: &str) -> String {
    let base_tag = base_tag(url);

    match head_open_re().find(html) {
        Some(head) => {
            let rest = &html[head.end()..];
            if rest.trim_start().starts_with(&base_tag) {
                return html.to_string();
            }

            let mut output = String::with_capacity(html.len() + base_tag.len() + 8);
            output.push_str(&html[..head.end()]);
            output.push_str("\n    ");
            output.push_str(&base_tag);
            output.push_str(rest);
            output
        }
        None => format!("<head>{base_tag}</head>\n{html}"),
    }
}

/// Remove every `<script>` element including its contents.
///
/// Runs to a fixpoint so that removing one element can never splice the
/// surrounding text into a new one.
pub fn strip_scripts(html: &str) -> String {
    let re = script_element_re();
    let mut current = html.to_string();
    while re.is_match(&current) {
        current = re.replace_all(&current, "").into_owned();
    }
    current
}

/// The HTML comment block prepended to every artifact.
pub fn build_provenance_comment(url: &str, captured_at: DateTime<Utc>) -> String {
    format!(
        "<!--\nArchived from: {}\nCaptured at (UTC): {}\n{}\n-->",
        url.replace("--", "%2D%2D"),
        format_timestamp(captured_at),
        GENERATOR_TAG
    )
}

/// RFC 3339 with microseconds and an explicit `+00:00` offset.
pub fn format_timestamp(timestamp: DateTime<Utc>) -> String {
    timestamp.to_rfc3339_opts(SecondsFormat::Micros, false)
}

fn base_tag(url: &str) -> String {
    format!(r#"<base href="{}" />"#, escape_attribute(url))
}

fn escape_attribute(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        match c {
            '&' => escaped.push_str("&amp;"),
            '"' => escaped.push_str("&quot;"),
            '<' => escaped.push_str("&lt;"),
            '>' => escaped.push_str("&gt;"),
            c => escaped.push(c),
        }
    }
    escaped
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    const URL: &str = "https://example.com/articles/1";

    #[test]
    fn base_tag_is_first_child_of_head() {
        let html = "<html><HEAD lang=\"en\"><title>t</title></HEAD><body></body></html>";
        let out = inject_base_tag(html, URL);
        let head_end = out.find("<HEAD lang=\"en\">").unwrap() + "<HEAD lang=\"en\">".len();
        assert!(out[head_end..]
            .trim_start()
            .starts_with(r#"<base href="https://example.com/articles/1" />"#));
        assert!(out.contains("<title>t</title>"));
    }

    #[test]
    fn header_element_is_not_a_head() {
        let html = "<body><header>menu</header></body>";
        let out = inject_base_tag(html, URL);
        assert!(out.starts_with(r#"<head><base href="https://example.com/articles/1" /></head>"#));
        assert!(out.ends_with(html));
    }

    #[test]
    fn missing_head_is_synthesized() {
        let out = inject_base_tag("<p>hi</p>", URL);
        assert_eq!(
            out,
            "<head><base href=\"https://example.com/articles/1\" /></head>\n<p>hi</p>"
        );
    }

    #[test]
    fn base_injection_is_idempotent() {
        for html in ["<html><head></head></html>", "<p>no head</p>", ""] {
            let once = inject_base_tag(html, URL);
            assert_eq!(inject_base_tag(&once, URL), once);
        }
    }

    #[test]
    fn base_href_is_escaped() {
        let out = inject_base_tag("<head></head>", "https://e.com/?a=1&b=\"x\"");
        assert!(out.contains(r#"href="https://e.com/?a=1&amp;b=&quot;x&quot;""#));
    }

    #[test]
    fn strips_multiline_scripts_with_attributes() {
        let html = "<p>a</p><SCRIPT type=\"text/javascript\">\nvar x = 1;\nalert(x);\n</Script><p>b</p>";
        assert_eq!(strip_scripts(html), "<p>a</p><p>b</p>");
    }

    #[test]
    fn keeps_content_between_scripts() {
        let html = "<script>1</script><main>keep</main><script src=\"x.js\"></script>";
        assert_eq!(strip_scripts(html), "<main>keep</main>");
    }

    #[test]
    fn spliced_scripts_do_not_survive() {
        let html = "<scr<script>x</script>ipt>alert(1)</script>";
        let out = strip_scripts(html);
        assert!(!out.to_lowercase().contains("<script"));
    }

    #[test]
    fn unterminated_script_is_removed() {
        assert_eq!(strip_scripts("<p>a</p><script>never closed"), "<p>a</p>");
    }

    #[test]
    fn scripting_lookalikes_are_left_alone() {
        let html = "<noscript>fallback</noscript><scripts>x</scripts>";
        assert_eq!(strip_scripts(html), html);
    }

    #[test]
    fn sanitize_is_idempotent() {
        let inputs = [
            "<html><head><script>a()</script></head><body>x</body></html>",
            "<script><head></script><p>tricky</p>",
            "<div>partial <head",
            "",
        ];
        for html in inputs {
            let once = sanitize_html(html, URL);
            assert_eq!(sanitize_html(&once, URL), once, "input: {html}");
            assert!(!once.to_lowercase().contains("<script"));
        }
    }

    #[test]
    fn provenance_comment_format() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 5, 7, 8, 9).unwrap();
        let comment = build_provenance_comment(URL, ts);
        assert_eq!(
            comment,
            "<!--\nArchived from: https://example.com/articles/1\n\
             Captured at (UTC): 2024-03-05T07:08:09.000000+00:00\n\
             Generated by Page Snapshot Service\n-->"
        );
    }
}

//! Allow-list HTML filter for text-like fields.
//!
//! Input is parsed as an HTML fragment and the resulting tree is written back
//! out. Script-like elements are removed with their content, comments are
//! dropped, elements outside the allow-list are replaced by their children,
//! and allowed elements are re-emitted without attributes (except a safe
//! `href` on `a`). Text is escaped, so markup that only appears once nested
//! tags are removed stays inert, and filtering the output again changes
//! nothing.

use scraper::{ElementRef, Html, Node};

/// Removed together with everything inside them.
const DROPPED: [&str; 9] = [
    "script", "style", "template", "noscript", "iframe", "object", "embed", "textarea", "title",
];

const VOID: [&str; 4] = ["br", "hr", "img", "wbr"];

const SAFE_HREF_PREFIXES: [&str; 5] = ["http://", "https://", "mailto:", "/", "#"];

/// Filter `input`, keeping only tags named in `allowed` (case-insensitive).
pub fn filter_html(input: &str, allowed: &[String]) -> String {
    if !input.contains(['<', '>', '&']) {
        return input.to_string();
    }
    let fragment = Html::parse_fragment(input);
    let mut out = String::with_capacity(input.len());
    write_children(fragment.root_element(), allowed, &mut out);
    out
}

/// Remove every tag.
pub fn strip_all_tags(input: &str) -> String {
    filter_html(input, &[])
}

fn write_children(parent: ElementRef<'_>, allowed: &[String], out: &mut String) {
    for child in parent.children() {
        match child.value() {
            Node::Text(text) => escape_into(text, false, out),
            Node::Element(_) => {
                if let Some(element) = ElementRef::wrap(child) {
                    write_element(element, allowed, out);
                }
            }
            _ => {}
        }
    }
}

fn write_element(element: ElementRef<'_>, allowed: &[String], out: &mut String) {
    let name = element.value().name().to_ascii_lowercase();
    if DROPPED.contains(&name.as_str()) {
        return;
    }
    if !allowed.iter().any(|a| a.eq_ignore_ascii_case(&name)) {
        write_children(element, allowed, out);
        return;
    }

    out.push('<');
    out.push_str(&name);
    if name == "a" {
        if let Some(href) = element.value().attr("href").and_then(safe_href) {
            out.push_str(" href=\"");
            escape_into(href, true, out);
            out.push('"');
        }
    }
    out.push('>');
    if VOID.contains(&name.as_str()) {
        return;
    }
    write_children(element, allowed, out);
    out.push_str("</");
    out.push_str(&name);
    out.push('>');
}

fn safe_href(href: &str) -> Option<&str> {
    let href = href.trim();
    let lower = href.to_ascii_lowercase();
    SAFE_HREF_PREFIXES
        .iter()
        .any(|p| lower.starts_with(p))
        .then_some(href)
}

fn escape_into(text: &str, attribute: bool, out: &mut String) {
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' if attribute => out.push_str("&quot;"),
            c => out.push(c),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tags(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn strips_all_markup_by_default() {
        assert_eq!(strip_all_tags("<b>Bold</b> and <i>it</i>"), "Bold and it");
        assert_eq!(strip_all_tags("plain text"), "plain text");
    }

    #[test]
    fn stray_angle_brackets_are_escaped() {
        assert_eq!(strip_all_tags("a < b and c > d"), "a &lt; b and c &gt; d");
        assert_eq!(strip_all_tags("Tom &amp; Jerry <b>!</b>"), "Tom &amp; Jerry !");
    }

    #[test]
    fn removes_script_and_style_content() {
        assert_eq!(
            strip_all_tags("ok<script>alert(1)</script><style>p{}</style><!-- note -->!"),
            "ok!"
        );
    }

    #[test]
    fn nested_tag_tricks_do_not_survive() {
        assert_eq!(
            strip_all_tags("<<b>script>alert(1)<</b>/script>"),
            "&lt;script&gt;alert(1)&lt;/script&gt;"
        );
    }

    #[test]
    fn deeply_nested_markup_leaves_no_live_tags() {
        let mut payload = "script>alert(document.cookie)".to_string();
        for _ in 0..32 {
            payload = format!("<<b>{payload}");
        }
        payload.insert_str(0, &"<".repeat(16));

        let once = strip_all_tags(&payload);
        assert!(!once.contains('<'), "{once}");
        assert!(once.ends_with("alert(document.cookie)"));
        assert_eq!(strip_all_tags(&once), once);
    }

    #[test]
    fn keeps_allowed_tags_without_attributes() {
        let allowed = tags(&["p", "strong"]);
        assert_eq!(
            filter_html(r#"<p class="x" onclick="evil()">Hi <strong>there</strong><em>!</em></p>"#, &allowed),
            "<p>Hi <strong>there</strong>!</p>"
        );
    }

    #[test]
    fn void_tags_have_no_closing_tag() {
        let allowed = tags(&["br"]);
        assert_eq!(filter_html("one<br/>two<br>", &allowed), "one<br>two<br>");
    }

    #[test]
    fn anchors_keep_only_safe_hrefs() {
        let allowed = tags(&["a"]);
        assert_eq!(
            filter_html(r#"<a href="https://example.com/?a=1&amp;b=2" target="_blank">x</a>"#, &allowed),
            r#"<a href="https://example.com/?a=1&amp;b=2">x</a>"#
        );
        assert_eq!(
            filter_html(r#"<a href="javascript:alert(1)">x</a>"#, &allowed),
            "<a>x</a>"
        );
        assert_eq!(
            filter_html(r#"<a href="&#106;avascript:alert(1)">x</a>"#, &allowed),
            "<a>x</a>"
        );
    }

    #[test]
    fn filtering_is_idempotent() {
        let allowed = tags(&["a", "p"]);
        let once = filter_html(
            r#"<p><a href='/shop?x="1"'>Shop &amp; save</a> <span>now</span> 1 < 2</p>"#,
            &allowed,
        );
        assert_eq!(filter_html(&once, &allowed), once);
    }
}

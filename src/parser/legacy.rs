//! Rewrites presentational HTML (deprecated tags and attributes) into inline CSS.

use crate::dom::{Document, NodeId};

/// Attributes without a CSS counterpart that e-readers reject.
const DROPPED_ATTRIBUTES: &[&str] = &["noshade", "compact", "frame", "rules", "summary"];

/// Elements whose width/height attributes are valid and must stay.
const SIZED_ELEMENTS: &[&str] = &["img", "svg", "video", "canvas", "col", "colgroup"];

fn css_length(value: &str) -> String {
    let v = value.trim();
    if !v.is_empty() && v.chars().all(|c| c.is_ascii_digit()) {
        format!("{v}px")
    } else {
        v.to_string()
    }
}

fn font_size(value: &str) -> &'static str {
    match value.trim() {
        "1" => "x-small",
        "2" => "small",
        "3" => "medium",
        "4" => "large",
        "5" => "x-large",
        "6" | "7" => "xx-large",
        v if v.starts_with('+') => "larger",
        v if v.starts_with('-') => "smaller",
        _ => "medium",
    }
}

/// Append declarations to the element's `style` attribute.
pub fn append_style(doc: &mut Document, el: NodeId, css: &str) {
    if css.is_empty() {
        return;
    }
    let style = match doc.attr(el, "style").map(str::trim) {
        Some(existing) if !existing.is_empty() => {
            format!("{}; {}", existing.trim_end_matches(';'), css)
        }
        _ => css.to_string(),
    };
    doc.set_attr(el, "style", style);
}

/// Replace deprecated presentational markup in place.
pub fn migrate_deprecated(doc: &mut Document) {
    for el in doc.elements() {
        let Some(tag) = doc.tag(el).map(str::to_string) else {
            continue;
        };
        let mut css: Vec<String> = Vec::new();
        match tag.as_str() {
            "basefont" => {
                doc.detach(el);
                continue;
            }
            "center" => {
                doc.rename(el, "div");
                css.push("text-align: center".into());
            }
            "font" => {
                doc.rename(el, "span");
                if let Some(color) = doc.remove_attr(el, "color") {
                    css.push(format!("color: {color}"));
                }
                if let Some(face) = doc.remove_attr(el, "face") {
                    css.push(format!("font-family: {face}"));
                }
                if let Some(size) = doc.remove_attr(el, "size") {
                    css.push(format!("font-size: {}", font_size(&size)));
                }
            }
            "big" => {
                doc.rename(el, "span");
                css.push("font-size: larger".into());
            }
            "strike" | "s" => {
                doc.rename(el, "span");
                css.push("text-decoration: line-through".into());
            }
            "tt" => {
                doc.rename(el, "span");
                css.push("font-family: monospace".into());
            }
            "u" => {
                doc.rename(el, "span");
                css.push("text-decoration: underline".into());
            }
            _ => {}
        }
        migrate_attributes(doc, el, &tag, &mut css);
        append_style(doc, el, &css.join("; "));
    }
}

fn migrate_attributes(doc: &mut Document, el: NodeId, tag: &str, css: &mut Vec<String>) {
    if let Some(align) = doc.remove_attr(el, "align") {
        let align = align.trim().to_ascii_lowercase();
        match (tag, align.as_str()) {
            ("img" | "table", "left" | "right") => css.push(format!("float: {align}")),
            ("img" | "table", "center" | "middle") => {
                css.push("display: block; margin-left: auto; margin-right: auto".into())
            }
            ("caption", _) => css.push(format!("caption-side: {align}")),
            (_, "middle") => css.push("vertical-align: middle".into()),
            _ => css.push(format!("text-align: {align}")),
        }
    }
    if let Some(valign) = doc.remove_attr(el, "valign") {
        css.push(format!("vertical-align: {}", valign.trim()));
    }
    if let Some(color) = doc.remove_attr(el, "bgcolor") {
        css.push(format!("background-color: {}", color.trim()));
    }
    if let Some(url) = doc.remove_attr(el, "background") {
        css.push(format!("background-image: url('{}')", url.trim()));
    }
    if tag != "font" {
        if let Some(color) = doc.remove_attr(el, "color") {
            css.push(format!("color: {}", color.trim()));
        }
    }
    if matches!(tag, "table" | "img") {
        if let Some(border) = doc.remove_attr(el, "border") {
            let width = css_length(&border);
            if width == "0px" || width.is_empty() {
                css.push("border: none".into());
            } else {
                css.push(format!("border: {width} solid"));
                if tag == "table" {
                    style_cells(doc, el, "border: 1px solid");
                }
            }
        }
    }
    if tag == "table" {
        if let Some(spacing) = doc.remove_attr(el, "cellspacing") {
            let spacing = css_length(&spacing);
            if spacing == "0px" {
                css.push("border-collapse: collapse".into());
            } else {
                css.push(format!("border-spacing: {spacing}"));
            }
        }
        if let Some(padding) = doc.remove_attr(el, "cellpadding") {
            let declaration = format!("padding: {}", css_length(&padding));
            style_cells(doc, el, &declaration);
        }
    }
    if !SIZED_ELEMENTS.contains(&tag) {
        if let Some(width) = doc.remove_attr(el, "width") {
            css.push(format!("width: {}", css_length(&width)));
        }
        if let Some(height) = doc.remove_attr(el, "height") {
            css.push(format!("height: {}", css_length(&height)));
        }
    }
    if let Some(clear) = doc.remove_attr(el, "clear") {
        let clear = match clear.trim().to_ascii_lowercase().as_str() {
            "all" | "both" => "both".to_string(),
            other => other.to_string(),
        };
        css.push(format!("clear: {clear}"));
    }
    if doc.remove_attr(el, "nowrap").is_some() {
        css.push("white-space: nowrap".into());
    }
    if let Some(h) = doc.remove_attr(el, "hspace") {
        let h = css_length(&h);
        css.push(format!("margin-left: {h}; margin-right: {h}"));
    }
    if let Some(v) = doc.remove_attr(el, "vspace") {
        let v = css_length(&v);
        css.push(format!("margin-top: {v}; margin-bottom: {v}"));
    }
    for name in DROPPED_ATTRIBUTES {
        doc.remove_attr(el, name);
    }
}

/// Style the cells that belong to `table` itself, not to nested tables.
fn style_cells(doc: &mut Document, table: NodeId, css: &str) {
    let cells: Vec<NodeId> = doc
        .descendants(table)
        .into_iter()
        .filter(|&n| matches!(doc.tag(n), Some("td" | "th")))
        .filter(|&n| doc.ancestors(n).find(|&a| doc.is_tag(a, "table")) == Some(table))
        .collect();
    for cell in cells {
        append_style(doc, cell, css);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn migrated(html: &str) -> String {
        let mut doc = Document::parse(html);
        migrate_deprecated(&mut doc);
        let body = doc.body().unwrap();
        doc.inner_xhtml(body)
    }

    #[test]
    fn center_becomes_div() {
        assert_eq!(
            migrated("<center>x</center>"),
            "<div style=\"text-align: center\">x</div>"
        );
    }

    #[test]
    fn font_becomes_span_with_css() {
        assert_eq!(
            migrated("<font color=\"red\" size=\"5\">x</font>"),
            "<span style=\"color: red; font-size: x-large\">x</span>"
        );
    }

    #[test]
    fn existing_style_is_kept() {
        assert_eq!(
            migrated("<p align=\"right\" style=\"color: blue;\">x</p>"),
            "<p style=\"color: blue; text-align: right\">x</p>"
        );
    }

    #[test]
    fn table_attributes_move_to_cells() {
        let out = migrated(
            "<table cellpadding=\"4\" width=\"50%\"><tr><td>a</td></tr></table>",
        );
        assert!(out.contains("<table style=\"width: 50%\">"), "{out}");
        assert!(out.contains("<td style=\"padding: 4px\">a</td>"), "{out}");
    }

    #[test]
    fn image_dimensions_are_kept() {
        let out = migrated("<img src=\"x.png\" width=\"20\" align=\"left\">");
        assert_eq!(out, "<img src=\"x.png\" width=\"20\" style=\"float: left\"/>");
    }

    #[test]
    fn br_clear_all() {
        assert_eq!(migrated("<br clear=\"all\">"), "<br style=\"clear: both\"/>");
    }
}

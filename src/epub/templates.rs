//! XHTML page shells for content documents, the title page and the about page.

use crate::dom::{escape_attr, escape_text};
use crate::model::{Book, Contributor};

use super::EpubVersion;

/// Wrap body markup in a complete XHTML document for `version`.
pub fn xhtml_page(
    version: EpubVersion,
    lang: &str,
    title: &str,
    head_extra: &str,
    body_attrs: &str,
    body: &str,
) -> String {
    let title = escape_text(title);
    let lang = escape_text(lang);
    match version {
        EpubVersion::Epub2 => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html PUBLIC "-//W3C//DTD XHTML 1.1//EN" "http://www.w3.org/TR/xhtml11/DTD/xhtml11.dtd">
<html xmlns="http://www.w3.org/1999/xhtml" xml:lang="{lang}">
<head>
  <meta http-equiv="Content-Type" content="application/xhtml+xml; charset=utf-8"/>
  <title>{title}</title>
  <link type="text/css" rel="stylesheet" href="main.css"/>
{head_extra}</head>
<body{body_attrs}>
{body}
</body>
</html>
"#
        ),
        EpubVersion::Epub3 => format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE html>
<html xmlns="http://www.w3.org/1999/xhtml" xmlns:epub="http://www.idpf.org/2007/ops" xml:lang="{lang}" lang="{lang}">
<head>
  <meta charset="UTF-8"/>
  <title>{title}</title>
  <link type="text/css" rel="stylesheet" href="main.css"/>
{head_extra}</head>
<body{body_attrs}>
{body}
</body>
</html>
"#
        ),
    }
}

/// Title page: cover, name, author, publication details and the logo.
pub fn title_page_body(book: &Book) -> String {
    let mut out = String::from("<div class=\"title-page\">\n");
    if let Some(cover) = book.cover_picture() {
        out.push_str(&format!(
            "<div class=\"cover\"><img src=\"images/{}\" alt=\"\"/></div>\n",
            escape_attr(&cover.title)
        ));
    }
    out.push_str(&format!("<h1>{}</h1>\n", escape_text(&book.name)));
    if !book.author.is_empty() {
        out.push_str(&format!("<p class=\"author\">{}</p>\n", escape_text(&book.author)));
    }
    if !book.translator.is_empty() {
        out.push_str(&format!("<p>{}</p>\n", escape_text(&book.translator)));
    }
    if !book.illustrator.is_empty() {
        out.push_str(&format!("<p>{}</p>\n", escape_text(&book.illustrator)));
    }
    let imprint: Vec<&str> = [&book.publisher, &book.place, &book.year]
        .into_iter()
        .map(String::as_str)
        .filter(|s| !s.is_empty())
        .collect();
    if !imprint.is_empty() {
        out.push_str(&format!("<p>{}</p>\n", escape_text(&imprint.join(", "))));
    }
    out.push_str("<img class=\"logo\" src=\"images/logo.svg\" alt=\"Wikisource\"/>\n</div>");
    out
}

/// About page: the wiki template followed by the contributor list.
pub fn about_page_body(template: &str, credits: &[Contributor]) -> String {
    let mut out = String::from("<div class=\"about\">\n");
    out.push_str(template);
    if !credits.is_empty() {
        out.push_str("\n<h2>Contributors</h2>\n<ul class=\"credits\">\n");
        for c in credits.iter().filter(|c| !c.bot) {
            out.push_str(&format!("<li>{}</li>\n", escape_text(&c.name)));
        }
        out.push_str("</ul>");
    }
    out.push_str("\n</div>");
    out
}

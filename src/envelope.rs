//! Content envelope: the source-agnostic message payload exchanged between
//! getters and pushers.
//!
//! An envelope is an ordered list of typed elements. It serializes to a
//! stable `[{ "type": ..., "data": {...} }, ...]` form, renders to a flat
//! display string and to markdown, and is never mutated once handed to the
//! refresh engine.

use serde::{Deserialize, Serialize};
use std::fmt;

/// One element of an envelope. The serde representation is the closed
/// `{ "type": <tag>, "data": { ... } }` tag set articles are stored under.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "lowercase")]
pub enum Element {
    Text {
        text: String,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        italic: bool,
    },
    Title {
        text: String,
        #[serde(default)]
        bold: bool,
        #[serde(default)]
        italic: bool,
        #[serde(default)]
        heading: u8,
    },
    Image {
        source: String,
        #[serde(default)]
        alt: String,
    },
    Url {
        source: String,
        title: String,
    },
}

impl Element {
    fn render_plain(&self, out: &mut String) {
        match self {
            Element::Text { text, .. } => out.push_str(text),
            Element::Title { text, .. } => {
                out.push_str(text);
                out.push('\n');
            }
            Element::Image { .. } => out.push('\n'),
            Element::Url { source, .. } => out.push_str(source),
        }
    }

    fn render_markdown(&self, out: &mut String) {
        match self {
            Element::Text { text, bold, italic } => {
                let mut s = text.clone();
                if *italic {
                    s = format!("*{s}*");
                }
                if *bold {
                    s = format!("**{s}**");
                }
                out.push_str(&s);
            }
            Element::Title { text, heading, .. } => {
                for _ in 0..*heading {
                    out.push('#');
                }
                out.push(' ');
                out.push_str(text);
                out.push('\n');
            }
            Element::Image { source, alt } => {
                out.push_str(&format!("![{alt}]({source})\n"));
            }
            Element::Url { source, title } => {
                out.push_str(&format!("[{title}]({source})"));
            }
        }
    }
}

/// Ordered, immutable-after-construction message payload.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Envelope {
    elements: Vec<Element>,
}

impl Envelope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn elements(&self) -> &[Element] {
        &self.elements
    }

    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    pub fn text(mut self, text: impl Into<String>) -> Self {
        self.elements.push(Element::Text {
            text: text.into(),
            bold: false,
            italic: false,
        });
        self
    }

    pub fn title(mut self, text: impl Into<String>, heading: u8) -> Self {
        self.elements.push(Element::Title {
            text: text.into(),
            bold: false,
            italic: false,
            heading,
        });
        self
    }

    pub fn image(mut self, source: impl Into<String>) -> Self {
        self.elements.push(Element::Image {
            source: source.into(),
            alt: String::new(),
        });
        self
    }

    pub fn link(mut self, source: impl Into<String>, title: impl Into<String>) -> Self {
        self.elements.push(Element::Url {
            source: source.into(),
            title: title.into(),
        });
        self
    }

    pub fn extend(mut self, other: Envelope) -> Self {
        self.elements.extend(other.elements);
        self
    }

    pub fn as_markdown(&self) -> String {
        let mut out = String::new();
        for el in &self.elements {
            el.render_markdown(&mut out);
        }
        out
    }

    /// Single-line, length-capped rendering for log lines.
    pub fn preview(&self) -> String {
        let flat: String = self.to_string().replace('\n', "\\n");
        let chars: Vec<char> = flat.chars().collect();
        if chars.len() <= 40 {
            return flat;
        }
        let head: String = chars[..20].iter().collect();
        let tail: String = chars[chars.len() - 20..].iter().collect();
        format!("{head}...{tail}")
    }

    /// Standard article layout: title, body, images, then an
    /// `author · HH:MM` footer and the source link.
    pub fn article(
        title: &str,
        body: &str,
        author: &str,
        url: &str,
        images: &[String],
        ts: i64,
    ) -> Self {
        let mut env = Envelope::new();

        let mut head = String::new();
        if !title.is_empty() {
            head.push_str(title);
            head.push_str("\n\n");
        }
        head.push_str(body);
        if !head.ends_with('\n') {
            head.push('\n');
        }
        env = env.text(head);

        for img in images {
            env = env.image(img.clone());
        }

        let hhmm = chrono::DateTime::from_timestamp(ts, 0)
            .map(|dt| dt.format("%H:%M").to_string())
            .unwrap_or_default();
        let author = if author.is_empty() {
            String::new()
        } else {
            format!("{author} · ")
        };
        let url = if url.is_empty() {
            String::new()
        } else {
            format!("\n{url}")
        };
        env.text(format!("\n{author}{hhmm}{url}"))
    }
}

impl fmt::Display for Envelope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut out = String::new();
        for el in &self.elements {
            el.render_plain(&mut out);
        }
        f.write_str(&out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Envelope {
        Envelope::new()
            .title("Release notes", 2)
            .text("Something shipped.")
            .image("https://example.com/a.png")
            .link("https://example.com", "example")
    }

    #[test]
    fn roundtrip_is_idempotent() {
        let env = sample();
        let json = serde_json::to_string(&env).unwrap();
        let back: Envelope = serde_json::from_str(&json).unwrap();
        assert_eq!(back, env);
        // serialize -> deserialize -> serialize is stable
        assert_eq!(serde_json::to_string(&back).unwrap(), json);
    }

    #[test]
    fn structural_form_uses_type_data_tags() {
        let env = Envelope::new().text("hi");
        let v = serde_json::to_value(&env).unwrap();
        assert_eq!(v[0]["type"], "text");
        assert_eq!(v[0]["data"]["text"], "hi");
    }

    #[test]
    fn display_concatenates_elements() {
        let s = sample().to_string();
        assert!(s.starts_with("Release notes\n"));
        assert!(s.contains("Something shipped."));
        assert!(s.ends_with("https://example.com"));
    }

    #[test]
    fn markdown_rendering() {
        let md = sample().as_markdown();
        assert!(md.contains("## Release notes\n"));
        assert!(md.contains("![](https://example.com/a.png)\n"));
        assert!(md.contains("[example](https://example.com)"));
    }

    #[test]
    fn preview_caps_length_and_escapes_newlines() {
        let short = Envelope::new().text("hello").preview();
        assert_eq!(short, "hello");

        let long = Envelope::new().text("x".repeat(100)).preview();
        assert_eq!(long.chars().count(), 43);
        assert!(long.contains("..."));

        let nl = Envelope::new().text("a\nb").preview();
        assert_eq!(nl, "a\\nb");
    }

    #[test]
    fn article_layout_has_footer() {
        let env = Envelope::article("T", "body", "me", "https://u", &[], 0);
        let s = env.to_string();
        assert!(s.starts_with("T\n\nbody\n"));
        assert!(s.contains("me · 00:00"));
        assert!(s.ends_with("https://u"));
    }
}

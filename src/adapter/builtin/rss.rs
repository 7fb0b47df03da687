//! RSS getter: lists item guids from a feed and renders title, summary,
//! and link into an envelope.

use std::sync::Arc;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use quick_xml::de::from_str;
use serde::Deserialize;

use crate::adapter::directory::GetterFactory;
use crate::adapter::{AdapterConfig, Getter, ItemDetail, NetContext};
use crate::envelope::Envelope;

#[derive(Debug, Deserialize)]
struct RssGetterConfig {
    url: String,
}

#[derive(Debug, Deserialize)]
struct Rss {
    channel: Channel,
}

#[derive(Debug, Deserialize)]
struct Channel {
    title: Option<String>,
    #[serde(rename = "item", default)]
    item: Vec<Item>,
}

#[derive(Debug, Deserialize)]
struct Item {
    title: Option<String>,
    link: Option<String>,
    guid: Option<Guid>,
    #[serde(rename = "pubDate")]
    pub_date: Option<String>,
    description: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Guid {
    #[serde(rename = "$value", default)]
    value: String,
}

impl Item {
    fn id(&self) -> Option<String> {
        self.guid
            .as_ref()
            .map(|g| g.value.clone())
            .filter(|v| !v.is_empty())
            .or_else(|| self.link.clone())
    }
}

pub struct RssGetter {
    url: String,
}

pub fn factory() -> Arc<dyn GetterFactory> {
    Arc::new(
        |_instance: Option<&str>, class_cfg: &AdapterConfig, inst_cfg: Option<&AdapterConfig>| {
            let extra = AdapterConfig::merged_extra(class_cfg, inst_cfg);
            let cfg: RssGetterConfig = AdapterConfig {
                extra,
                ..Default::default()
            }
            .typed()?;
            Ok(Arc::new(RssGetter { url: cfg.url }) as Arc<dyn Getter>)
        },
    )
}

impl RssGetter {
    async fn fetch_feed(&self, net: &NetContext) -> Result<Rss> {
        let body = net
            .client
            .get(&self.url)
            .send()
            .await
            .with_context(|| format!("fetching {}", self.url))?
            .text()
            .await
            .context("reading feed body")?;
        let xml = scrub_html_entities_for_xml(&body);
        from_str(&xml).with_context(|| format!("parsing rss from {}", self.url))
    }
}

#[async_trait]
impl Getter for RssGetter {
    async fn list(&self, net: &NetContext) -> Result<Vec<String>> {
        let rss = self.fetch_feed(net).await?;
        Ok(rss.channel.item.iter().filter_map(Item::id).collect())
    }

    async fn detail(&self, id: &str, net: &NetContext) -> Result<ItemDetail> {
        let rss = self.fetch_feed(net).await?;
        let author = rss.channel.title.clone().unwrap_or_else(|| "rss".to_string());
        let item = rss
            .channel
            .item
            .into_iter()
            .find(|it| it.id().as_deref() == Some(id))
            .ok_or_else(|| anyhow!("item {id} no longer present in feed"))?;

        let ts = item
            .pub_date
            .as_deref()
            .and_then(|s| chrono::DateTime::parse_from_rfc2822(s).ok())
            .map(|dt| dt.timestamp())
            .unwrap_or_else(|| chrono::Utc::now().timestamp());

        let content = Envelope::article(
            item.title.as_deref().unwrap_or_default(),
            &normalize_text(item.description.as_deref().unwrap_or_default()),
            &author,
            item.link.as_deref().unwrap_or_default(),
            &[],
            ts,
        );
        Ok(ItemDetail {
            user_id: author,
            ts,
            content,
        })
    }
}

/// Decode entities, strip tags, collapse whitespace.
fn normalize_text(s: &str) -> String {
    let mut out = html_escape::decode_html_entities(s).to_string();

    static RE_TAGS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_tags = RE_TAGS.get_or_init(|| regex::Regex::new(r"(?is)</?[^>]+>").unwrap());
    out = re_tags.replace_all(&out, "").to_string();

    static RE_WS: once_cell::sync::OnceCell<regex::Regex> = once_cell::sync::OnceCell::new();
    let re_ws = RE_WS.get_or_init(|| regex::Regex::new(r"\s+").unwrap());
    out = re_ws.replace_all(&out, " ").to_string();
    out.trim().to_string()
}

/// Feeds routinely embed HTML entities that are not valid XML.
fn scrub_html_entities_for_xml(s: &str) -> String {
    s.replace("&nbsp;", " ")
        .replace("&ndash;", "-")
        .replace("&mdash;", "-")
        .replace("&ldquo;", "\"")
        .replace("&rdquo;", "\"")
        .replace("&lsquo;", "'")
        .replace("&rsquo;", "'")
}

#[cfg(test)]
mod tests {
    use super::*;

    const FEED: &str = r#"<?xml version="1.0"?>
        <rss version="2.0">
          <channel>
            <title>Example Feed</title>
            <item>
              <title>First post</title>
              <link>https://example.com/1</link>
              <guid>post-1</guid>
              <pubDate>Mon, 02 Jun 2025 09:00:00 GMT</pubDate>
              <description>Hello &amp;ndash; world&nbsp;&lt;b&gt;bold&lt;/b&gt;</description>
            </item>
            <item>
              <title>No guid</title>
              <link>https://example.com/2</link>
            </item>
          </channel>
        </rss>"#;

    #[test]
    fn parses_ids_preferring_guid() {
        let rss: Rss = from_str(&scrub_html_entities_for_xml(FEED)).unwrap();
        let ids: Vec<String> = rss.channel.item.iter().filter_map(Item::id).collect();
        assert_eq!(ids, vec!["post-1", "https://example.com/2"]);
    }

    #[test]
    fn normalize_strips_tags_and_entities() {
        assert_eq!(normalize_text("a &amp; <b>b</b>\n\n c"), "a & b c");
    }

    #[test]
    fn factory_requires_url() {
        let empty = AdapterConfig::default();
        assert!(factory().build(None, &empty, None).is_err());

        let cfg: AdapterConfig = toml::from_str(r#"url = "https://example.com/rss""#).unwrap();
        assert!(factory().build(None, &cfg, None).is_ok());
    }

    #[test]
    fn instance_url_overrides_class_url() {
        let class: AdapterConfig = toml::from_str(r#"url = "https://a""#).unwrap();
        let inst: AdapterConfig = toml::from_str(r#"url = "https://b""#).unwrap();
        let extra = AdapterConfig::merged_extra(&class, Some(&inst));
        let cfg: RssGetterConfig = AdapterConfig {
            extra,
            ..Default::default()
        }
        .typed()
        .unwrap();
        assert_eq!(cfg.url, "https://b");
    }
}

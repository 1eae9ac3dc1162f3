use anyhow::{anyhow, Result};
use scraper::{ElementRef, Html, Selector};
use sitewatch_core::detect::{ItemExtractor, RawItem};

/// Extracts one candidate per element matching `item`:
/// - id: the `id_attr` attribute of the element
/// - date: text of the first descendant matching `date`
/// - title: the element's text with every `date` descendant left out
pub struct HtmlListExtractor {
    item: Selector,
    date: Selector,
    id_attr: String,
}

impl HtmlListExtractor {
    pub fn new(item_selector: &str, id_attr: &str, date_selector: &str) -> Result<Self> {
        Ok(Self {
            item: parse_selector(item_selector)?,
            date: parse_selector(date_selector)?,
            id_attr: id_attr.to_string(),
        })
    }

    fn text_outside_dates(&self, el: ElementRef<'_>) -> String {
        let mut out = String::new();
        for node in el.descendants() {
            let Some(text) = node.value().as_text() else {
                continue;
            };
            let in_date = node
                .ancestors()
                .take_while(|a| a.id() != el.id())
                .filter_map(ElementRef::wrap)
                .any(|a| self.date.matches(&a));
            if !in_date {
                out.push_str(text);
            }
        }
        out
    }
}

fn parse_selector(s: &str) -> Result<Selector> {
    Selector::parse(s).map_err(|e| anyhow!("invalid css selector {s:?}: {e}"))
}

impl ItemExtractor for HtmlListExtractor {
    fn extract(&self, payload: &str) -> Vec<RawItem> {
        let doc = Html::parse_document(payload);
        doc.select(&self.item)
            .map(|el| RawItem {
                id: el.value().attr(&self.id_attr).map(str::to_string),
                title: self.text_outside_dates(el),
                date: el
                    .select(&self.date)
                    .next()
                    .map(|d| d.text().collect::<String>())
                    .unwrap_or_default(),
            })
            .collect()
    }
}

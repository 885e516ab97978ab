use super::cleaner::{clean_text, non_empty};
use crate::models::{Metric, MetricRecord};
use anyhow::Result;
use scraper::{Html, Selector};

const DETAIL_LINK_TEXT: &str = "查看淘宝商品详情";

fn selector(css: &str) -> Result<Selector> {
    Selector::parse(css).map_err(|e| anyhow::anyhow!("selector {css:?}: {:?}", e))
}

// ── Product detail page ───────────────────────────────────────────────────────

/// Pull the metric cards, product title and detail link out of a rendered
/// product page. Fields missing from the page stay `None`.
pub fn parse_product_page(html: &str) -> Result<MetricRecord> {
    let doc = Html::parse_document(html);

    let card_sel = selector(".card_content_item_box")?;
    let title_sel = selector(".card_content_item_box_title")?;
    let number_sel = selector(".card_content_item_box_number")?;
    let name_sel = selector("div.header_right_title")?;
    let a_sel = selector("a")?;

    let mut record = MetricRecord::default();

    for card in doc.select(&card_sel) {
        let (Some(title), Some(number)) =
            (card.select(&title_sel).next(), card.select(&number_sel).next())
        else {
            continue;
        };
        let title = clean_text(title.text());
        let value = clean_text(number.text());
        if let Some(metric) = Metric::ALL.iter().find(|m| title.starts_with(m.label())) {
            record.set(*metric, value);
        }
    }

    record.product_name = doc
        .select(&name_sel)
        .next()
        .and_then(|el| non_empty(clean_text(el.text())));

    record.link = doc
        .select(&a_sel)
        .find(|a| a.text().collect::<String>().contains(DETAIL_LINK_TEXT))
        .and_then(|a| a.value().attr("href"))
        .map(|h| h.trim().to_string());

    Ok(record)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn card(title: &str, value: &str) -> String {
        format!(
            r#"<div class="card_content_item_box">
                 <div class="card_content_item_box_title">{title}<i class="tip"></i></div>
                 <div class="card_content_item_box_number"> {value} </div>
               </div>"#
        )
    }

    fn page(cards: &[(&str, &str)]) -> String {
        let body: String = cards.iter().map(|(t, v)| card(t, v)).collect();
        format!(
            r#"<html><body>
                 <div class="header_right_title"> 陶瓷马克杯 </div>
                 {body}
                 <a class="jump" href="https://item.taobao.com/item.htm?id=42">查看淘宝商品详情 &gt;</a>
               </body></html>"#
        )
    }

    #[test]
    fn parses_all_nine_metrics() {
        let cards: Vec<(&str, &str)> = vec![
            ("搜索人气", "1,203"),
            ("搜索热度", "12.5"),
            ("点击人气", "120"),
            ("点击热度", "88"),
            ("点击率", "3.2%"),
            ("交易指数", "4,410"),
            ("支付转化率", "25%"),
            ("商品指数", "500"),
            ("飙升热度（%）", "7.1"),
        ];
        let record = parse_product_page(&page(&cards)).unwrap();

        assert!(record.is_complete());
        assert_eq!(record.get(Metric::SearchPopularity), Some("1,203"));
        assert_eq!(record.get(Metric::ClickRate), Some("3.2%"));
        assert_eq!(record.get(Metric::SoaringHeat), Some("7.1"));
        assert_eq!(record.product_name.as_deref(), Some("陶瓷马克杯"));
        assert_eq!(record.link.as_deref(), Some("https://item.taobao.com/item.htm?id=42"));
    }

    #[test]
    fn title_prefix_matching_ignores_suffixes() {
        let record = parse_product_page(&page(&[("点击人气 (近7天)", "120")])).unwrap();
        assert_eq!(record.get(Metric::ClickPopularity), Some("120"));
        assert_eq!(record.get(Metric::ClickRate), None);
        assert!(!record.is_complete());
    }

    #[test]
    fn blank_page_is_empty_record() {
        let record = parse_product_page("<html><body><p>稍后再试</p></body></html>").unwrap();
        assert!(record.is_empty());
    }

    #[test]
    fn unknown_cards_are_ignored() {
        let record = parse_product_page(&page(&[("收藏人数", "9")])).unwrap();
        assert!(Metric::ALL.iter().all(|m| record.get(*m).is_none()));
    }
}

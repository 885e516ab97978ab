use serde::{Deserialize, Serialize};
use std::fmt;

// ── Ranking boards ────────────────────────────────────────────────────────────

/// Ranking list shown on the portal's listing page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum Board {
    #[serde(rename = "热搜榜", alias = "hot_search")]
    HotSearch,
    #[serde(rename = "飙升榜", alias = "rising")]
    Rising,
    #[default]
    #[serde(rename = "热销榜", alias = "best_selling")]
    BestSelling,
}

impl Board {
    /// Tab caption as rendered by the portal.
    pub fn label(self) -> &'static str {
        match self {
            Board::HotSearch => "热搜榜",
            Board::Rising => "飙升榜",
            Board::BestSelling => "热销榜",
        }
    }
}

impl fmt::Display for Board {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Statistics window on a product detail page.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum TimeRange {
    /// Default view, no toggle needed.
    #[default]
    #[serde(rename = "7")]
    Week,
    #[serde(rename = "30")]
    Month,
}

impl TimeRange {
    pub fn needs_toggle(self) -> bool {
        matches!(self, TimeRange::Month)
    }
}

// ── Category tasks ────────────────────────────────────────────────────────────

/// One row of the task-source spreadsheet.
#[derive(Debug, Clone, PartialEq)]
pub struct CategoryTask {
    pub name: String,
    /// 1-based spreadsheet row, header is row 1.
    pub row: u32,
    pub ready: bool,
    pub completed: bool,
}

// ── Leaf records ──────────────────────────────────────────────────────────────

/// Product link / thumbnail pair harvested from a leaf category grid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct LeafRecord {
    #[serde(rename = "Link")]
    pub link: String,
    #[serde(rename = "Image")]
    pub image: String,
}

// ── Metrics ───────────────────────────────────────────────────────────────────

/// The nine KPIs scraped from a product page, in spreadsheet column order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Metric {
    SearchPopularity,
    SearchHeat,
    ClickPopularity,
    ClickHeat,
    ClickRate,
    TradeIndex,
    ConversionRate,
    ProductIndex,
    SoaringHeat,
}

impl Metric {
    pub const ALL: [Metric; 9] = [
        Metric::SearchPopularity,
        Metric::SearchHeat,
        Metric::ClickPopularity,
        Metric::ClickHeat,
        Metric::ClickRate,
        Metric::TradeIndex,
        Metric::ConversionRate,
        Metric::ProductIndex,
        Metric::SoaringHeat,
    ];

    /// Card title prefix on the product page, also the column header.
    pub fn label(self) -> &'static str {
        match self {
            Metric::SearchPopularity => "搜索人气",
            Metric::SearchHeat => "搜索热度",
            Metric::ClickPopularity => "点击人气",
            Metric::ClickHeat => "点击热度",
            Metric::ClickRate => "点击率",
            Metric::TradeIndex => "交易指数",
            Metric::ConversionRate => "支付转化率",
            Metric::ProductIndex => "商品指数",
            Metric::SoaringHeat => "飙升热度（%）",
        }
    }

    /// Columns rendered with a trailing `%` in the assembled sheet.
    pub fn displays_percent(self) -> bool {
        matches!(self, Metric::SearchHeat | Metric::SoaringHeat)
    }

    fn index(self) -> usize {
        Metric::ALL.iter().position(|m| *m == self).unwrap_or(0)
    }
}

/// Everything scraped from one product page. `None` means the field was
/// not found in the rendered page.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct MetricRecord {
    values: [Option<String>; 9],
    pub product_name: Option<String>,
    pub link: Option<String>,
}

impl MetricRecord {
    pub fn get(&self, metric: Metric) -> Option<&str> {
        self.values[metric.index()].as_deref()
    }

    pub fn set(&mut self, metric: Metric, value: impl Into<String>) {
        self.values[metric.index()] = Some(value.into());
    }

    /// True when not a single field was found, i.e. the scrape failed.
    pub fn is_empty(&self) -> bool {
        self.values.iter().all(Option::is_none)
            && self.product_name.is_none()
            && self.link.is_none()
    }

    /// True when the name and every metric are present.
    pub fn is_complete(&self) -> bool {
        self.product_name.is_some() && self.values.iter().all(Option::is_some)
    }

    pub fn missing(&self) -> Vec<&'static str> {
        let mut out: Vec<&'static str> = Metric::ALL
            .iter()
            .filter(|m| self.get(**m).is_none())
            .map(|m| m.label())
            .collect();
        if self.product_name.is_none() {
            out.insert(0, columns::PRODUCT_NAME);
        }
        out
    }
}

// ── Spreadsheet layout ────────────────────────────────────────────────────────

pub mod columns {
    use super::Metric;

    pub const IMAGE: &str = "图片";
    pub const LINK: &str = "链接";
    pub const IMAGE_LINK: &str = "图片链接";
    pub const PRODUCT_NAME: &str = "商品名称";
    pub const TOTAL_VISITORS: &str = "总访客数";
    pub const CHANNEL_RATIO: &str = "手淘占比";

    /// Fixed 13-column header of an assembled spreadsheet.
    pub fn assembled_header() -> Vec<&'static str> {
        let mut header = vec![IMAGE, LINK, IMAGE_LINK, PRODUCT_NAME];
        header.extend(Metric::ALL.iter().map(|m| m.label()));
        header
    }
}

/// One row of an assembled spreadsheet, ready to be written.
#[derive(Debug, Clone)]
pub struct AssembledRow {
    pub image: Option<Vec<u8>>,
    pub link: String,
    pub image_link: String,
    pub product_name: String,
    pub metrics: Vec<String>,
}

impl AssembledRow {
    /// `None` when the record is incomplete.
    pub fn from_record(record: &MetricRecord, image_link: &str, image: Option<Vec<u8>>) -> Option<Self> {
        if !record.is_complete() {
            return None;
        }
        let metrics = Metric::ALL
            .iter()
            .map(|m| {
                let v = record.get(*m).unwrap_or_default();
                if m.displays_percent() {
                    format!("{v}%")
                } else {
                    v.to_string()
                }
            })
            .collect();
        Some(Self {
            image,
            link: record.link.clone().unwrap_or_default(),
            image_link: image_link.to_string(),
            product_name: record.product_name.clone().unwrap_or_default(),
            metrics,
        })
    }
}

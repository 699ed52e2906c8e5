//! 详情页结构化数据提取
//!
//! 依次尝试：
//! 1. `application/ld+json` 链接数据
//! 2. 内嵌初始状态脚本（`__INITIAL_STATE__` / `__NEXT_DATA__`）
//! 3. 正则兜底：5 位邮编 + 价格
//!
//! 后面的层只补充前面缺失的字段。

use once_cell::sync::Lazy;
use regex::Regex;
use scraper::{Html, Selector};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExtractionTier {
    LinkedData,
    InitialState,
    TextFallback,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ListingDetail {
    pub title: Option<String>,
    pub image: Option<String>,
    pub postal: Option<String>,
    pub city: Option<String>,
    pub price: Option<String>,
    pub lat: Option<f64>,
    pub lon: Option<f64>,
    /// 第一个给出位置信息的层
    pub location_tier: Option<ExtractionTier>,
}

impl ListingDetail {
    pub fn coords(&self) -> Option<(f64, f64)> {
        Some((self.lat?, self.lon?))
    }

    fn has_location(&self) -> bool {
        self.coords().is_some() || self.postal.is_some() || self.city.is_some()
    }

    fn set_coords(&mut self, lat: Option<f64>, lon: Option<f64>) {
        if self.coords().is_some() {
            return;
        }
        if let (Some(lat), Some(lon)) = (lat, lon) {
            if (-90.0..=90.0).contains(&lat) && (-180.0..=180.0).contains(&lon) && (lat, lon) != (0.0, 0.0) {
                self.lat = Some(lat);
                self.lon = Some(lon);
            }
        }
    }
}

static LD_JSON: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"script[type="application/ld+json"]"#).expect("selector"));
static SCRIPTS: Lazy<Selector> = Lazy::new(|| Selector::parse("script").expect("selector"));
static OG_TITLE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:title"]"#).expect("selector"));
static OG_IMAGE: Lazy<Selector> =
    Lazy::new(|| Selector::parse(r#"meta[property="og:image"]"#).expect("selector"));
static BODY: Lazy<Selector> = Lazy::new(|| Selector::parse("body").expect("selector"));

static STATE_ASSIGN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:__INITIAL_STATE__|__PRELOADED_STATE__)\s*=\s*").expect("regex")
});
static POSTAL: Lazy<Regex> = Lazy::new(|| Regex::new(r"\b(\d{5})\b").expect("regex"));
static CITY_AFTER_POSTAL: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[ \t]+([A-ZÄÖÜ][A-Za-zÄÖÜäöüß.]*(?:-[A-ZÄÖÜ][A-Za-zÄÖÜäöüß.]*)*)").expect("regex"));
static PRICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(\d{1,3}(?:\.\d{3})+|\d+)(?:,\d{1,2})?\s*(?:€|EUR)(?:\s*VB)?").expect("regex")
});
static PRICE_VB: Lazy<Regex> = Lazy::new(|| Regex::new(r"\bVB\b").expect("regex"));

pub fn extract_detail(html: &str) -> ListingDetail {
    let doc = Html::parse_document(html);
    let mut detail = ListingDetail::default();

    for script in doc.select(&LD_JSON) {
        let raw: String = script.text().collect();
        if let Ok(value) = serde_json::from_str::<Value>(raw.trim()) {
            fill_from_json(&value, &mut detail, 0);
        }
    }
    mark_tier(&mut detail, ExtractionTier::LinkedData);

    if let Some(state) = initial_state(&doc) {
        fill_from_json(&state, &mut detail, 0);
        mark_tier(&mut detail, ExtractionTier::InitialState);
    }

    if !detail.has_location() || detail.price.is_none() {
        fill_from_text(&visible_text(&doc), &mut detail);
        mark_tier(&mut detail, ExtractionTier::TextFallback);
    }

    if detail.title.is_none() {
        detail.title = meta_content(&doc, &OG_TITLE);
    }
    if detail.image.is_none() {
        detail.image = meta_content(&doc, &OG_IMAGE);
    }

    detail
}

fn mark_tier(detail: &mut ListingDetail, tier: ExtractionTier) {
    if detail.location_tier.is_none() && detail.has_location() {
        detail.location_tier = Some(tier);
    }
}

fn meta_content(doc: &Html, selector: &Selector) -> Option<String> {
    doc.select(selector)
        .next()
        .and_then(|m| m.value().attr("content"))
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn initial_state(doc: &Html) -> Option<Value> {
    for script in doc.select(&SCRIPTS) {
        let is_next_data = script.value().id() == Some("__NEXT_DATA__");
        let raw: String = script.text().collect();

        if is_next_data {
            if let Ok(value) = serde_json::from_str(raw.trim()) {
                return Some(value);
            }
            continue;
        }

        if let Some(assign) = STATE_ASSIGN.find(&raw) {
            // 只读赋值右侧的第一个 JSON 值，后面的语句忽略
            let mut values = serde_json::Deserializer::from_str(&raw[assign.end()..]).into_iter::<Value>();
            if let Some(Ok(value @ Value::Object(_))) = values.next() {
                return Some(value);
            }
        }
    }
    None
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

fn first_image(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Array(items) => items.iter().find_map(first_image),
        Value::Object(map) => map
            .get("url")
            .or_else(|| map.get("contentUrl"))
            .and_then(first_image),
        _ => None,
    }
}

const MAX_DEPTH: usize = 12;

/// 深度优先遍历 JSON，只填充尚未设置的字段
fn fill_from_json(value: &Value, detail: &mut ListingDetail, depth: usize) {
    if depth > MAX_DEPTH {
        return;
    }

    match value {
        Value::Array(items) => {
            for item in items {
                fill_from_json(item, detail, depth + 1);
            }
        }
        Value::Object(map) => {
            let lat = ["latitude", "lat"].iter().find_map(|k| map.get(*k).and_then(as_number));
            let lon = ["longitude", "lng", "lon"]
                .iter()
                .find_map(|k| map.get(*k).and_then(as_number));
            detail.set_coords(lat, lon);

            for (key, child) in map {
                match key.as_str() {
                    "postalCode" | "zipCode" | "zip" | "postcode" if detail.postal.is_none() => {
                        detail.postal = as_text(child).filter(|p| is_postal(p));
                    }
                    "addressLocality" | "city" | "cityName" if detail.city.is_none() => {
                        detail.city = as_text(child);
                    }
                    "price" | "priceAmount" if detail.price.is_none() => {
                        detail.price = as_text(child);
                    }
                    "name" | "title" if depth <= 1 && detail.title.is_none() => {
                        detail.title = as_text(child);
                    }
                    "image" | "imageUrl" | "thumbnailUrl" if detail.image.is_none() => {
                        detail.image = first_image(child);
                    }
                    _ => {}
                }
                if child.is_object() || child.is_array() {
                    fill_from_json(child, detail, depth + 1);
                }
            }
        }
        _ => {}
    }
}

fn is_postal(s: &str) -> bool {
    s.len() == 5 && s.chars().all(|c| c.is_ascii_digit())
}

/// 页面可见文本（跳过 script/style）
fn visible_text(doc: &Html) -> String {
    let root = doc.select(&BODY).next().unwrap_or_else(|| doc.root_element());
    let mut out = String::new();
    for node in root.descendants() {
        if let Some(text) = node.value().as_text() {
            let hidden = node
                .parent()
                .and_then(|p| p.value().as_element())
                .map(|e| matches!(e.name(), "script" | "style" | "noscript"))
                .unwrap_or(false);
            if !hidden {
                out.push_str(text);
                out.push(' ');
            }
        }
    }
    out
}

/// 正则兜底
pub fn fill_from_text(text: &str, detail: &mut ListingDetail) {
    if detail.postal.is_none() {
        for m in POSTAL.find_iter(text) {
            if !postal_context_ok(text, m.start(), m.end()) {
                continue;
            }
            detail.postal = Some(m.as_str().to_string());
            if detail.city.is_none() {
                detail.city = CITY_AFTER_POSTAL
                    .captures(&text[m.end()..])
                    .map(|c| c[1].to_string());
            }
            break;
        }
    }

    if detail.price.is_none() {
        detail.price = PRICE
            .find(text)
            .map(|m| m.as_str().to_string())
            .or_else(|| PRICE_VB.find(text).map(|_| "VB".to_string()));
    }
}

/// 排除价格、带连字符编号等看起来不像地址的 5 位数字
fn postal_context_ok(text: &str, start: usize, end: usize) -> bool {
    let before = text[..start].chars().rev().find(|c| !c.is_whitespace());
    let immediately_before = text[..start].chars().next_back();
    let after_raw = &text[end..];
    let mut after_chars = after_raw.chars();
    let immediately_after = after_chars.next();
    let after_trimmed = after_raw.trim_start();

    if matches!(immediately_before, Some('-' | '.' | ',' | '/' | '#' | '+')) {
        return false;
    }
    if matches!(before, Some('€')) {
        return false;
    }
    match immediately_after {
        Some('-' | '/' | '%') => return false,
        Some('.' | ',') if after_chars.next().is_some_and(|c| c.is_ascii_digit()) => return false,
        _ => {}
    }
    if after_trimmed.starts_with('€')
        || after_trimmed.starts_with("EUR")
        || after_trimmed.starts_with("Euro")
        || after_trimmed.starts_with("km")
    {
        return false;
    }
    true
}

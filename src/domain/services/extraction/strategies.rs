use regex::Regex;
use scraper::{ElementRef, Html, Selector};
use serde_json::Value;
use std::sync::OnceLock;

use crate::domain::entities::product::StrategyKind;
use crate::domain::services::text::clean_text;

/// Loosely-typed triple (plus extras) located by a strategy, not yet validated
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawCandidate {
    pub name: String,
    pub price_text: String,
    pub sku: Option<String>,
    pub barcode: Option<String>,
    pub brand: Option<String>,
    pub promo_price_text: Option<String>,
    pub stock: Option<i64>,
    pub url: Option<String>,
}

/// What a single strategy found in a page
#[derive(Debug, Default)]
pub struct StrategyOutput {
    pub candidates: Vec<RawCandidate>,
    /// Fragments that looked like products but could not be read
    pub errors: Vec<String>,
}

/// A pure `(markup) -> candidates` extraction strategy.
///
/// Strategies are tried strongest first by the engine.
pub trait CandidateStrategy: Send + Sync {
    fn kind(&self) -> StrategyKind;

    fn find_candidates(&self, markup: &str) -> StrategyOutput;
}

fn selector(css: &str) -> Option<Selector> {
    Selector::parse(css).ok()
}

fn non_empty(value: impl AsRef<str>) -> Option<String> {
    let trimmed = value.as_ref().trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

fn element_text(element: ElementRef<'_>) -> String {
    clean_text(&element.text().collect::<Vec<_>>().join(" "))
}

/// Parse an integer stock level out of free text ("12 un", "stock: 7")
pub fn parse_stock(text: &str) -> Option<i64> {
    let digits: String = text
        .chars()
        .skip_while(|c| !c.is_ascii_digit())
        .take_while(|c| c.is_ascii_digit())
        .collect();
    digits.parse().ok()
}

/// Product cards annotated with data attributes or schema.org microdata.
pub struct StructuredCardStrategy {
    card_selector: Option<Selector>,
    name_selector: Option<Selector>,
    price_selector: Option<Selector>,
    promo_selector: Option<Selector>,
    sku_selector: Option<Selector>,
    barcode_selector: Option<Selector>,
    brand_selector: Option<Selector>,
    link_selector: Option<Selector>,
}

impl Default for StructuredCardStrategy {
    fn default() -> Self {
        Self {
            card_selector: selector(
                "[data-product-id], [data-sku], .product-card, .product-item, [itemtype*=\"schema.org/Product\"]",
            ),
            name_selector: selector("[itemprop=\"name\"], .product-name, .product-title"),
            price_selector: selector("[itemprop=\"price\"], .product-price, .price"),
            promo_selector: selector(".promo-price, .sale-price, [data-promo-price]"),
            sku_selector: selector("[itemprop=\"sku\"], .product-sku"),
            barcode_selector: selector("[itemprop=\"gtin13\"], [itemprop=\"gtin\"], .product-ean"),
            brand_selector: selector("[itemprop=\"brand\"], .product-brand"),
            link_selector: selector("a[href]"),
        }
    }
}

impl StructuredCardStrategy {
    fn first_match<'a>(card: ElementRef<'a>, sel: &Option<Selector>) -> Option<ElementRef<'a>> {
        sel.as_ref().and_then(|s| card.select(s).next())
    }

    /// `content` attribute wins over text, matching microdata conventions
    fn field_value(card: ElementRef<'_>, sel: &Option<Selector>) -> Option<String> {
        Self::first_match(card, sel).and_then(|el| {
            el.value()
                .attr("content")
                .and_then(non_empty)
                .or_else(|| non_empty(element_text(el)))
        })
    }

    fn attr(card: ElementRef<'_>, names: &[&str]) -> Option<String> {
        names
            .iter()
            .find_map(|name| card.value().attr(name).and_then(non_empty))
    }

    fn read_card(&self, card: ElementRef<'_>) -> Option<RawCandidate> {
        let name = Self::attr(card, &["data-name", "data-product-name"])
            .or_else(|| Self::field_value(card, &self.name_selector))?;
        let price_text = Self::attr(card, &["data-price"])
            .or_else(|| Self::field_value(card, &self.price_selector))?;

        Some(RawCandidate {
            name,
            price_text,
            sku: Self::attr(card, &["data-sku", "data-product-id"])
                .or_else(|| Self::field_value(card, &self.sku_selector)),
            barcode: Self::attr(card, &["data-ean", "data-gtin", "data-barcode"])
                .or_else(|| Self::field_value(card, &self.barcode_selector)),
            brand: Self::attr(card, &["data-brand"])
                .or_else(|| Self::field_value(card, &self.brand_selector)),
            promo_price_text: Self::attr(card, &["data-promo-price"])
                .or_else(|| Self::field_value(card, &self.promo_selector)),
            stock: Self::attr(card, &["data-stock"]).and_then(|s| parse_stock(&s)),
            url: Self::first_match(card, &self.link_selector)
                .and_then(|a| a.value().attr("href"))
                .and_then(non_empty),
        })
    }
}

impl CandidateStrategy for StructuredCardStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Structured
    }

    fn find_candidates(&self, markup: &str) -> StrategyOutput {
        let mut output = StrategyOutput::default();
        let Some(card_selector) = &self.card_selector else {
            return output;
        };

        let document = Html::parse_document(markup);
        for (index, card) in document.select(card_selector).enumerate() {
            match self.read_card(card) {
                Some(candidate) => output.candidates.push(candidate),
                None => output
                    .errors
                    .push(format!("structured card #{} has no name or price", index)),
            }
        }
        output
    }
}

/// Embedded JSON-LD documents describing `Product` entities.
pub struct JsonLdStrategy {
    script_selector: Option<Selector>,
}

impl Default for JsonLdStrategy {
    fn default() -> Self {
        Self {
            script_selector: selector("script[type=\"application/ld+json\"]"),
        }
    }
}

impl JsonLdStrategy {
    fn is_product(value: &Value) -> bool {
        match value.get("@type") {
            Some(Value::String(t)) => t.eq_ignore_ascii_case("Product"),
            Some(Value::Array(types)) => types
                .iter()
                .any(|t| t.as_str().is_some_and(|t| t.eq_ignore_ascii_case("Product"))),
            _ => false,
        }
    }

    fn scalar(value: Option<&Value>) -> Option<String> {
        match value? {
            Value::String(s) => non_empty(s),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        }
    }

    fn brand(value: Option<&Value>) -> Option<String> {
        let value = value?;
        if value.is_object() {
            Self::scalar(value.get("name"))
        } else {
            Self::scalar(Some(value))
        }
    }

    /// First offer carrying a price; `offers` may be an object or a list
    fn offer(value: &Value) -> Option<&Value> {
        let offers = value.get("offers")?;
        match offers {
            Value::Array(list) => list.iter().find(|o| o.get("price").is_some()),
            Value::Object(_) => Some(offers),
            _ => None,
        }
    }

    fn read_product(value: &Value) -> Result<RawCandidate, String> {
        let name = Self::scalar(value.get("name")).ok_or("JSON-LD product without name")?;
        let offer = Self::offer(value);
        let price_text = offer
            .and_then(|o| Self::scalar(o.get("price")).or_else(|| Self::scalar(o.get("lowPrice"))))
            .ok_or_else(|| format!("JSON-LD product '{}' without price", name))?;

        Ok(RawCandidate {
            name,
            price_text,
            sku: Self::scalar(value.get("sku")).or_else(|| Self::scalar(value.get("productID"))),
            barcode: ["gtin13", "gtin", "gtin12", "gtin8"]
                .iter()
                .find_map(|k| Self::scalar(value.get(*k))),
            brand: Self::brand(value.get("brand")),
            promo_price_text: None,
            stock: offer
                .and_then(|o| o.get("inventoryLevel"))
                .and_then(|level| Self::scalar(level.get("value")).or_else(|| Self::scalar(Some(level))))
                .and_then(|s| parse_stock(&s)),
            url: Self::scalar(value.get("url"))
                .or_else(|| offer.and_then(|o| Self::scalar(o.get("url")))),
        })
    }

    /// Walk a JSON-LD document collecting every product node, including
    /// those nested in `@graph` and `ItemList` wrappers.
    fn collect(value: &Value, output: &mut StrategyOutput) {
        match value {
            Value::Array(items) => items.iter().for_each(|v| Self::collect(v, output)),
            Value::Object(map) => {
                if Self::is_product(value) {
                    match Self::read_product(value) {
                        Ok(candidate) => output.candidates.push(candidate),
                        Err(e) => output.errors.push(e),
                    }
                    return;
                }
                if let Some(graph) = map.get("@graph") {
                    Self::collect(graph, output);
                }
                if let Some(elements) = map.get("itemListElement") {
                    Self::collect(elements, output);
                }
                if let Some(item) = map.get("item") {
                    Self::collect(item, output);
                }
            }
            _ => {}
        }
    }
}

impl CandidateStrategy for JsonLdStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Alternate
    }

    fn find_candidates(&self, markup: &str) -> StrategyOutput {
        let mut output = StrategyOutput::default();
        let Some(script_selector) = &self.script_selector else {
            return output;
        };

        let document = Html::parse_document(markup);
        for script in document.select(script_selector) {
            let body = script.inner_html();
            match serde_json::from_str::<Value>(body.trim()) {
                Ok(value) => Self::collect(&value, &mut output),
                Err(e) => output.errors.push(format!("malformed JSON-LD block: {}", e)),
            }
        }
        output
    }
}

fn generic_pattern() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r#"(?is)<(?:h[1-6]|span|div|a|p|strong)\b[^>]*class\s*=\s*["'][^"']*(?:name|title)[^"']*["'][^>]*>(.{1,300}?)</(?:h[1-6]|span|div|a|p|strong)>.{0,400}?((?:R\$|US\$|\$|€|£)\s*[0-9][0-9.,]*)"#,
        )
        .expect("valid generic product regex")
    })
}

/// Last resort: a name-looking element followed closely by a currency amount.
#[derive(Default)]
pub struct GenericPatternStrategy;

impl CandidateStrategy for GenericPatternStrategy {
    fn kind(&self) -> StrategyKind {
        StrategyKind::Generic
    }

    fn find_candidates(&self, markup: &str) -> StrategyOutput {
        let candidates = generic_pattern()
            .captures_iter(markup)
            .map(|caps| RawCandidate {
                name: clean_text(&caps[1]),
                price_text: caps[2].to_string(),
                ..Default::default()
            })
            .collect();
        StrategyOutput {
            candidates,
            errors: Vec::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const CARDS: &str = r#"
        <div class="grid">
          <div class="product-card" data-sku="SKU-1" data-ean="7894900011517" data-stock="12">
            <a href="/p/coca-cola-2l"><h3 class="product-name">Coca-Cola &amp; Gelo 2L</h3></a>
            <span class="product-brand">Coca-Cola</span>
            <span class="price">R$ 9,99</span>
          </div>
          <div class="product-card" data-product-id="SKU-2">
            <span itemprop="name">Arroz Tipo 1 5kg</span>
            <meta itemprop="price" content="24.90">
          </div>
          <div class="product-card"><span class="product-name">Broken</span></div>
        </div>"#;

    #[test]
    fn test_structured_reads_cards() {
        let output = StructuredCardStrategy::default().find_candidates(CARDS);

        assert_eq!(output.candidates.len(), 2);
        assert_eq!(output.errors.len(), 1);

        let first = &output.candidates[0];
        assert_eq!(first.name, "Coca-Cola & Gelo 2L");
        assert_eq!(first.price_text, "R$ 9,99");
        assert_eq!(first.sku.as_deref(), Some("SKU-1"));
        assert_eq!(first.barcode.as_deref(), Some("7894900011517"));
        assert_eq!(first.brand.as_deref(), Some("Coca-Cola"));
        assert_eq!(first.stock, Some(12));
        assert_eq!(first.url.as_deref(), Some("/p/coca-cola-2l"));

        let second = &output.candidates[1];
        assert_eq!(second.price_text, "24.90");
        assert_eq!(second.sku.as_deref(), Some("SKU-2"));
    }

    #[test]
    fn test_json_ld_reads_products_and_graphs() {
        let markup = r#"
            <script type="application/ld+json">
              {"@context":"https://schema.org","@graph":[
                {"@type":"Product","name":"Cerveja Lata 350ml","sku":"BEER-1",
                 "gtin13":"7891149100903","brand":{"@type":"Brand","name":"Brahma"},
                 "offers":{"@type":"Offer","price":"3.49"}},
                {"@type":"Product","name":"No price here"}
              ]}
            </script>
            <script type="application/ld+json">{ not json </script>"#;

        let output = JsonLdStrategy::default().find_candidates(markup);

        assert_eq!(output.candidates.len(), 1);
        let beer = &output.candidates[0];
        assert_eq!(beer.name, "Cerveja Lata 350ml");
        assert_eq!(beer.price_text, "3.49");
        assert_eq!(beer.sku.as_deref(), Some("BEER-1"));
        assert_eq!(beer.brand.as_deref(), Some("Brahma"));
        assert_eq!(beer.barcode.as_deref(), Some("7891149100903"));
        assert_eq!(output.errors.len(), 2);
    }

    #[test]
    fn test_json_ld_numeric_price_and_offer_list() {
        let markup = r#"<script type="application/ld+json">
            [{"@type":"Product","name":"Detergente 500ml","offers":[{"price":2.75}]}]
            </script>"#;

        let output = JsonLdStrategy::default().find_candidates(markup);
        assert_eq!(output.candidates.len(), 1);
        assert_eq!(output.candidates[0].price_text, "2.75");
    }

    #[test]
    fn test_generic_pattern_finds_name_price_pairs() {
        let markup = r#"
            <li><h2 class="item-title">Sabão em Pó 1kg</h2><em>por</em> <b>R$ 12,50</b></li>
            <li><div class="name">Amaciante 2L</div><span>$ 8.10</span></li>"#;

        let output = GenericPatternStrategy.find_candidates(markup);
        assert_eq!(output.candidates.len(), 2);
        assert_eq!(output.candidates[0].name, "Sabão em Pó 1kg");
        assert_eq!(output.candidates[0].price_text, "R$ 12,50");
        assert_eq!(output.candidates[1].name, "Amaciante 2L");
        assert!(output.candidates[1].sku.is_none());
    }

    #[test]
    fn test_parse_stock() {
        assert_eq!(parse_stock("12 un"), Some(12));
        assert_eq!(parse_stock("stock: 7"), Some(7));
        assert_eq!(parse_stock("out"), None);
    }
}

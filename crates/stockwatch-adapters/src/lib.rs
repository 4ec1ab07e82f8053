//! Catalog adapter contract + the Games Island listing extractor.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use scraper::{ElementRef, Html, Selector};
use stockwatch_core::{Product, ProductSet, UNCATEGORIZED};
use stockwatch_storage::{DocumentSource, FetchError};
use thiserror::Error;
use tracing::{debug, info};
use url::Url;

pub const CRATE_NAME: &str = "stockwatch-adapters";

pub const GAMES_ISLAND_SOURCE_ID: &str = "games-island";
pub const GAMES_ISLAND_LISTING_URL: &str = "https://crawlme.games-island.eu/c/Magic-The-Gathering";
pub const GAMES_ISLAND_BASE_URL: &str = "https://games-island.eu/en";

/// Status phrases that mean the product can be ordered right now.
const IN_STOCK_PHRASES: &[&str] = &["auf lager", "verfügbar"];

/// Negated forms of the in-stock phrases. Checked first so that
/// "nicht verfügbar" never reads as available.
const OUT_OF_STOCK_PHRASES: &[&str] = &[
    "nicht auf lager",
    "nicht verfügbar",
    "nicht lieferbar",
    "ausverkauft",
];

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    pub url: String,
    pub body: String,
    pub fetched_at: DateTime<Utc>,
}

#[derive(Debug, Error)]
pub enum AdapterError {
    #[error("{0}")]
    Message(String),
    #[error("fetching listing: {0}")]
    Fetch(#[from] FetchError),
}

#[async_trait]
pub trait CatalogAdapter: Send + Sync {
    fn source_id(&self) -> &'static str;
    fn listing_url(&self) -> &str;

    async fn fetch_listing(&self, http: &dyn DocumentSource) -> Result<FetchedPage, AdapterError>;

    fn parse_listing(&self, page: &FetchedPage) -> Result<ProductSet, AdapterError>;
}

/// Maps a free-text stock status to an in-stock decision.
///
/// Unknown or empty text is treated as out of stock.
pub fn is_in_stock(status_text: &str) -> bool {
    let normalized = status_text.trim().to_lowercase();
    if normalized.is_empty() {
        return false;
    }
    if OUT_OF_STOCK_PHRASES.iter().any(|p| normalized.contains(p)) {
        return false;
    }
    IN_STOCK_PHRASES.iter().any(|p| normalized.contains(p))
}

/// Absolute hrefs pass through; anything else is appended to `base_url`.
pub fn resolve_url(base_url: &str, href: &str) -> String {
    if Url::parse(href).is_ok() {
        href.to_string()
    } else {
        format!("{base_url}{href}")
    }
}

struct RowSelectors {
    row: Selector,
    cell: Selector,
    link: Selector,
    bold: Selector,
}

impl RowSelectors {
    fn new() -> Result<Self, AdapterError> {
        Ok(Self {
            row: parse_selector("tr")?,
            cell: parse_selector("td")?,
            link: parse_selector("a")?,
            bold: parse_selector("b")?,
        })
    }
}

fn parse_selector(selector: &str) -> Result<Selector, AdapterError> {
    Selector::parse(selector).map_err(|e| AdapterError::Message(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_string()
}

/// Walks the table rows of a listing page in document order.
///
/// A row with a single cell or a bold element is a category header; its link
/// text becomes the category of the product rows that follow. A product row
/// has at least two cells with a link in the first one. Rows that fit neither
/// shape are skipped.
pub fn extract_products(html: &str, base_url: &str) -> Result<ProductSet, AdapterError> {
    let selectors = RowSelectors::new()?;
    let document = Html::parse_document(html);

    let mut products = ProductSet::new();
    let mut current_category = UNCATEGORIZED.to_string();

    for row in document.select(&selectors.row) {
        let cells: Vec<ElementRef<'_>> = row.select(&selectors.cell).collect();
        if cells.is_empty() {
            continue;
        }

        if cells.len() == 1 || row.select(&selectors.bold).next().is_some() {
            if let Some(link) = row.select(&selectors.link).next() {
                current_category = element_text(link);
            }
            continue;
        }

        let Some(link) = cells[0].select(&selectors.link).next() else {
            continue;
        };
        let name = element_text(link);
        let href = link.value().attr("href").unwrap_or_default().trim();
        if name.is_empty() || href.is_empty() {
            continue;
        }

        let url = resolve_url(base_url, href);
        let status = element_text(cells[1]);
        products.insert(
            url.clone(),
            Product {
                name,
                url,
                in_stock: is_in_stock(&status),
                category: current_category.clone(),
            },
        );
    }

    Ok(products)
}

#[derive(Debug, Clone)]
pub struct GamesIslandAdapter {
    listing_url: String,
    base_url: String,
}

impl GamesIslandAdapter {
    pub fn new(listing_url: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            listing_url: listing_url.into(),
            base_url: base_url.into(),
        }
    }
}

impl Default for GamesIslandAdapter {
    fn default() -> Self {
        Self::new(GAMES_ISLAND_LISTING_URL, GAMES_ISLAND_BASE_URL)
    }
}

#[async_trait]
impl CatalogAdapter for GamesIslandAdapter {
    fn source_id(&self) -> &'static str {
        GAMES_ISLAND_SOURCE_ID
    }

    fn listing_url(&self) -> &str {
        &self.listing_url
    }

    async fn fetch_listing(&self, http: &dyn DocumentSource) -> Result<FetchedPage, AdapterError> {
        let resp = http.fetch_text(&self.listing_url).await?;
        debug!(status = %resp.status, url = %resp.final_url, "fetched listing");
        Ok(FetchedPage {
            url: resp.final_url,
            body: resp.body,
            fetched_at: Utc::now(),
        })
    }

    fn parse_listing(&self, page: &FetchedPage) -> Result<ProductSet, AdapterError> {
        let products = extract_products(&page.body, &self.base_url)?;
        info!(source_id = self.source_id(), products = products.len(), "scraped listing");
        Ok(products)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::{Path, PathBuf};
    use stockwatch_storage::FetchedResponse;

    const BASE: &str = "https://games-island.eu/en";

    fn fixture_path(name: &str) -> PathBuf {
        Path::new(env!("CARGO_MANIFEST_DIR"))
            .join("../../fixtures/games-island")
            .join(name)
    }

    fn table(rows: &str) -> String {
        format!("<html><body><table>{rows}</table></body></html>")
    }

    fn page(body: String) -> FetchedPage {
        FetchedPage {
            url: GAMES_ISLAND_LISTING_URL.to_string(),
            body,
            fetched_at: Utc::now(),
        }
    }

    struct StaticSource {
        status: u16,
        body: &'static str,
    }

    #[async_trait]
    impl DocumentSource for StaticSource {
        async fn fetch_text(&self, url: &str) -> Result<FetchedResponse, FetchError> {
            if self.status >= 400 {
                return Err(FetchError::HttpStatus {
                    status: self.status,
                    url: url.to_string(),
                });
            }
            Ok(FetchedResponse {
                status: reqwest::StatusCode::OK,
                final_url: url.to_string(),
                body: self.body.to_string(),
            })
        }
    }

    #[test]
    fn classifier_accepts_known_phrases_case_and_whitespace_insensitive() {
        assert!(is_in_stock("  Auf Lager \n"));
        assert!(is_in_stock("sofort VERFÜGBAR"));
        assert!(is_in_stock("auf lager, 3-5 Tage"));
    }

    #[test]
    fn classifier_rejects_unknown_negated_and_empty_text() {
        assert!(!is_in_stock("Nicht verfügbar"));
        assert!(!is_in_stock("Nicht auf Lager"));
        assert!(!is_in_stock("Ausverkauft"));
        assert!(!is_in_stock("Vorbestellung"));
        assert!(!is_in_stock(""));
        assert!(!is_in_stock("   "));
    }

    #[test]
    fn relative_hrefs_are_joined_to_base_and_absolute_ones_kept() {
        assert_eq!(resolve_url(BASE, "/p/x"), "https://games-island.eu/en/p/x");
        assert_eq!(
            resolve_url(BASE, "https://other.example/p/y"),
            "https://other.example/p/y"
        );
    }

    #[test]
    fn fixture_listing_extracts_products_with_categories() {
        let html = std::fs::read_to_string(fixture_path("listing.html")).unwrap();
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products.len(), 5);

        let foundations = &products["https://games-island.eu/en/p/mtg-foundations-play-booster-display"];
        assert_eq!(foundations.name, "MTG Foundations Play Booster Display (DE)");
        assert!(foundations.in_stock);
        assert_eq!(foundations.category, "Booster Displays");

        let duskmourn = &products["https://games-island.eu/en/p/mtg-duskmourn-collector-booster-display"];
        assert!(!duskmourn.in_stock);

        let aetherdrift = &products["https://games-island.eu/en/p/mtg-aetherdrift-play-booster-display"];
        assert!(aetherdrift.in_stock);
        assert_eq!(aetherdrift.category, "Booster Displays");

        let jeskai = &products["https://games-island.eu/en/p/mtg-commander-deck-jeskai-striker"];
        assert!(!jeskai.in_stock);
        assert_eq!(jeskai.category, "Commander Decks");

        let larceny = &products["https://games-island.eu/en/p/mtg-commander-deck-grand-larceny"];
        assert!(larceny.in_stock);
        assert_eq!(larceny.category, "Commander Decks");
    }

    #[test]
    fn document_without_product_rows_yields_empty_set() {
        let html = table(r#"<tr><td><b>Kategorie</b> <a href="/c/x">Singles</a></td></tr>"#);
        assert!(extract_products(&html, BASE).unwrap().is_empty());
        assert!(extract_products("<html><body><p>maintenance</p></body></html>", BASE)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn header_category_applies_to_following_rows() {
        let html = table(
            r#"<tr><td><b>Kategorie:</b> <a href="/c/prerelease"> Prerelease Packs </a></td><td></td></tr>
               <tr><td><a href="/p/one">One</a></td><td>Auf Lager</td></tr>
               <tr><td><a href="/p/two">Two</a></td><td>Nicht verfügbar</td></tr>"#,
        );
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products.len(), 2);
        for product in products.values() {
            assert_eq!(product.category, "Prerelease Packs");
        }
    }

    #[test]
    fn products_before_any_header_are_uncategorized() {
        let html = table(r#"<tr><td><a href="/p/one">One</a></td><td>Auf Lager</td></tr>"#);
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products["https://games-island.eu/en/p/one"].category, UNCATEGORIZED);
    }

    #[test]
    fn header_without_link_keeps_previous_category() {
        let html = table(
            r#"<tr><td><a href="/c/a">Alpha</a></td></tr>
               <tr><td>plain header</td></tr>
               <tr><td><a href="/p/one">One</a></td><td>Auf Lager</td></tr>"#,
        );
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products["https://games-island.eu/en/p/one"].category, "Alpha");
    }

    #[test]
    fn malformed_rows_are_skipped() {
        let html = table(
            r#"<tr></tr>
               <tr><td>no link</td><td>Auf Lager</td></tr>
               <tr><td><a href="/p/empty-name">   </a></td><td>Auf Lager</td></tr>
               <tr><td><a>no href</a></td><td>Auf Lager</td></tr>
               <tr><td><a href="/p/ok">Ok</a></td><td>Auf Lager</td></tr>"#,
        );
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products.len(), 1);
        assert!(products.contains_key("https://games-island.eu/en/p/ok"));
    }

    #[test]
    fn duplicate_urls_keep_the_last_row() {
        let html = table(
            r#"<tr><td><a href="/p/dup">First</a></td><td>Nicht auf Lager</td></tr>
               <tr><td><a href="/p/dup">Second</a></td><td>Auf Lager</td></tr>"#,
        );
        let products = extract_products(&html, BASE).unwrap();
        assert_eq!(products.len(), 1);
        let dup = &products["https://games-island.eu/en/p/dup"];
        assert_eq!(dup.name, "Second");
        assert!(dup.in_stock);
    }

    #[tokio::test]
    async fn adapter_fetches_and_parses_listing() {
        let adapter = GamesIslandAdapter::default();
        let source = StaticSource {
            status: 200,
            body: r#"<table><tr><td><a href="/p/one">One</a></td><td>Auf Lager</td></tr></table>"#,
        };
        let fetched = adapter.fetch_listing(&source).await.unwrap();
        assert_eq!(fetched.url, GAMES_ISLAND_LISTING_URL);

        let products = adapter.parse_listing(&fetched).unwrap();
        assert!(products["https://games-island.eu/en/p/one"].in_stock);
        assert_eq!(adapter.source_id(), GAMES_ISLAND_SOURCE_ID);
    }

    #[tokio::test]
    async fn adapter_surfaces_non_success_fetch() {
        let adapter = GamesIslandAdapter::default();
        let source = StaticSource {
            status: 503,
            body: "",
        };
        let err = adapter.fetch_listing(&source).await.unwrap_err();
        assert!(matches!(
            err,
            AdapterError::Fetch(FetchError::HttpStatus { status: 503, .. })
        ));
    }

    #[test]
    fn parse_listing_uses_configured_base_url() {
        let adapter = GamesIslandAdapter::new("https://listing.test/c", "https://shop.test");
        let html = table(r#"<tr><td><a href="/p/one">One</a></td><td>Auf Lager</td></tr>"#);
        let products = adapter.parse_listing(&page(html)).unwrap();
        assert!(products.contains_key("https://shop.test/p/one"));
    }
}

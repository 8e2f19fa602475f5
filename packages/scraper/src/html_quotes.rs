//! HTML quote page scraper.
//!
//! Fetches `{base}/page/{n}/`, locates each quote block via CSS selector,
//! and extracts its text, author, tags and author link. A page links to its
//! successor through a "next" pager element.

use async_trait::async_trait;
use quote_grid_quote_models::Quote;
use scraper::{ElementRef, Html, Selector};

use crate::{QuoteSource, ScrapeConfig, ScrapeError, SourcePage, join_url, retry};

/// CSS selectors used to pick quotes out of a page.
#[derive(Debug, Clone)]
pub struct QuoteSelectors {
    /// One element per quote.
    pub quote: String,
    /// The quote text, inside a quote element.
    pub text: String,
    /// The author name, inside a quote element.
    pub author: String,
    /// The author link, inside a quote element.
    pub author_link: String,
    /// Each tag, inside a quote element.
    pub tag: String,
    /// Present on the page only when a next page exists.
    pub next_page: String,
    /// Outbound link to look for on an author page.
    pub enrich_link: String,
}

impl Default for QuoteSelectors {
    fn default() -> Self {
        Self {
            quote: "div.quote".to_owned(),
            text: ".text".to_owned(),
            author: ".author".to_owned(),
            author_link: "a[href*=\"/author/\"]".to_owned(),
            tag: ".tags a.tag".to_owned(),
            next_page: "li.next a".to_owned(),
            enrich_link: "a[href*=\"goodreads.com\"]".to_owned(),
        }
    }
}

/// Scraper for paginated HTML quote listings.
#[derive(Debug, Clone)]
pub struct HtmlQuoteScraper {
    /// Shared scrape configuration (URL, headers, retry budget).
    config: ScrapeConfig,
    /// Selectors used to parse each page.
    selectors: QuoteSelectors,
}

impl HtmlQuoteScraper {
    /// Creates a new `HtmlQuoteScraper` with the default selectors.
    #[must_use]
    pub fn new(config: ScrapeConfig) -> Self {
        Self {
            config,
            selectors: QuoteSelectors::default(),
        }
    }

    /// Overrides the selectors.
    #[must_use]
    pub fn with_selectors(mut self, selectors: QuoteSelectors) -> Self {
        self.selectors = selectors;
        self
    }

    /// Returns a reference to the underlying scrape configuration.
    #[must_use]
    pub const fn config(&self) -> &ScrapeConfig {
        &self.config
    }

    /// Builds the URL of page `page`.
    #[must_use]
    pub fn page_url(&self, page: u32) -> String {
        join_url(&self.config.url, &format!("page/{page}/"))
    }

    /// Parses one listing page into quotes.
    ///
    /// Quote blocks missing either a text or an author are skipped with a
    /// warning rather than failing the whole page.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Parse`] if a configured selector is invalid.
    pub fn parse_page(&self, body: &str, page: u32) -> Result<SourcePage, ScrapeError> {
        let document = Html::parse_document(body);
        let source_url = self.page_url(page);

        let quote_sel = parse_selector(&self.selectors.quote)?;
        let text_sel = parse_selector(&self.selectors.text)?;
        let author_sel = parse_selector(&self.selectors.author)?;
        let author_link_sel = parse_selector(&self.selectors.author_link)?;
        let tag_sel = parse_selector(&self.selectors.tag)?;
        let next_sel = parse_selector(&self.selectors.next_page)?;

        let mut quotes = Vec::new();

        for element in document.select(&quote_sel) {
            let text = first_text(element, &text_sel);
            let author = first_text(element, &author_sel);

            let (Some(text), Some(author)) = (text, author) else {
                log::warn!("Page {page}: skipping quote block without text or author");
                continue;
            };

            let tags: Vec<String> = element
                .select(&tag_sel)
                .map(element_text)
                .filter(|tag| !tag.is_empty())
                .collect();

            let author_url = element
                .select(&author_link_sel)
                .next()
                .and_then(|link| link.value().attr("href"))
                .map(|href| self.absolutize(href));

            let index = u32::try_from(quotes.len()).unwrap_or(u32::MAX);
            quotes.push(
                Quote::new(&text, &author, tags, &source_url, page, index)
                    .with_author_url(author_url),
            );
        }

        let has_next = document.select(&next_sel).next().is_some();

        log::debug!("Page {page}: {} quotes, has_next={has_next}", quotes.len());

        Ok(SourcePage {
            quotes,
            has_next,
            page_number: page,
        })
    }

    /// Finds the first outbound enrichment link on an author page.
    ///
    /// # Errors
    ///
    /// Returns [`ScrapeError::Parse`] if the enrichment selector is invalid.
    pub fn parse_enrich_link(&self, body: &str) -> Result<Option<String>, ScrapeError> {
        let document = Html::parse_document(body);
        let link_sel = parse_selector(&self.selectors.enrich_link)?;
        Ok(document
            .select(&link_sel)
            .next()
            .and_then(|link| link.value().attr("href"))
            .map(str::to_owned))
    }

    fn absolutize(&self, href: &str) -> String {
        if href.starts_with("http://") || href.starts_with("https://") {
            href.to_owned()
        } else {
            join_url(&self.config.url, href)
        }
    }
}

#[async_trait]
impl QuoteSource for HtmlQuoteScraper {
    fn id(&self) -> &'static str {
        "html_quotes"
    }

    async fn fetch_page(&self, page: u32) -> Result<SourcePage, ScrapeError> {
        let client = self.config.build_client()?;
        let url = self.page_url(page);

        log::debug!("Fetching HTML page {page}: {url}");

        let body = retry::send_text(|| client.get(&url), self.config.retry_policy()).await?;
        self.parse_page(&body, page)
    }

    async fn enrich(&self, quote: &Quote) -> Result<Option<String>, ScrapeError> {
        let Some(author_url) = quote.author_url.as_deref() else {
            return Ok(None);
        };
        let client = self.config.build_client()?;
        let body = retry::send_text(|| client.get(author_url), self.config.retry_policy()).await?;
        self.parse_enrich_link(&body)
    }
}

/// Parses a CSS selector string, returning a [`ScrapeError`] on failure.
fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector)
        .map_err(|e| ScrapeError::Parse(format!("invalid CSS selector '{selector}': {e}")))
}

fn element_text(element: ElementRef<'_>) -> String {
    element.text().collect::<String>().trim().to_owned()
}

fn first_text(element: ElementRef<'_>, selector: &Selector) -> Option<String> {
    element
        .select(selector)
        .next()
        .map(element_text)
        .filter(|s| !s.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    const LISTING: &str = r#"
        <html><body>
        <div class="quote">
            <span class="text">“The world as we have created it is a process of our thinking.”</span>
            <span>by <small class="author">Albert Einstein</small>
            <a href="/author/Albert-Einstein">(about)</a></span>
            <div class="tags">Tags:
                <a class="tag" href="/tag/change/page/1/">change</a>
                <a class="tag" href="/tag/thinking/page/1/">thinking</a>
            </div>
        </div>
        <div class="quote">
            <span class="text">“It is our choices, Harry, that show what we truly are.”</span>
            <span>by <small class="author">J.K. Rowling</small></span>
            <div class="tags">Tags: </div>
        </div>
        <div class="quote">
            <span class="text">   </span>
        </div>
        <nav><ul class="pager"><li class="next"><a href="/page/2/">Next</a></li></ul></nav>
        </body></html>
    "#;

    fn scraper() -> HtmlQuoteScraper {
        HtmlQuoteScraper::new(ScrapeConfig::new("https://quotes.example"))
    }

    #[test]
    fn parses_quotes_in_order() {
        let page = scraper().parse_page(LISTING, 3).unwrap();

        assert_eq!(page.page_number, 3);
        assert!(page.has_next);
        assert_eq!(page.quotes.len(), 2);

        let first = &page.quotes[0];
        assert_eq!(first.author, "Albert Einstein");
        assert_eq!(first.tags, vec!["change", "thinking"]);
        assert_eq!(first.page_number, 3);
        assert_eq!(first.index_within_page, 0);
        assert_eq!(first.source_url, "https://quotes.example/page/3/");
        assert_eq!(
            first.author_url.as_deref(),
            Some("https://quotes.example/author/Albert-Einstein")
        );

        let second = &page.quotes[1];
        assert_eq!(second.index_within_page, 1);
        assert!(second.tags.is_empty());
        assert!(second.author_url.is_none());
    }

    #[test]
    fn last_page_has_no_next() {
        let body = LISTING.replace(r#"<li class="next">"#, r#"<li class="previous">"#);
        let page = scraper().parse_page(&body, 10).unwrap();
        assert!(!page.has_next);
    }

    #[test]
    fn empty_page_parses_to_no_quotes() {
        let page = scraper()
            .parse_page("<html><body>No quotes found!</body></html>", 11)
            .unwrap();
        assert!(page.quotes.is_empty());
        assert!(!page.has_next);
    }

    #[test]
    fn invalid_selector_is_a_parse_error() {
        let scraper = scraper().with_selectors(QuoteSelectors {
            quote: "div[".to_owned(),
            ..QuoteSelectors::default()
        });
        assert!(matches!(
            scraper.parse_page(LISTING, 1),
            Err(ScrapeError::Parse(_))
        ));
    }

    #[test]
    fn finds_enrichment_link() {
        let body = r#"<div class="author-details">
            <a href="https://www.goodreads.com/author/show/9810">Goodreads</a></div>"#;
        assert_eq!(
            scraper().parse_enrich_link(body).unwrap().as_deref(),
            Some("https://www.goodreads.com/author/show/9810")
        );
        assert_eq!(scraper().parse_enrich_link("<p>none</p>").unwrap(), None);
    }
}

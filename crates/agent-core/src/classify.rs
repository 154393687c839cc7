//! Page-understanding provider contract and the default keyword classifier.
//!
//! The coordination core never parses DOM structure; it consumes a
//! [`PageSnapshot`] and asks a [`PageUnderstanding`] provider what it
//! means. The trait is the boundary an external semantic engine plugs into;
//! [`KeywordClassifier`] is the built-in provider working from URL/text
//! indicator tables.

use pagecrew_core_types::{ElementCategory, ElementDescriptor, PageSnapshot, PageType};

/// Contract a page-understanding provider must satisfy to plug into the
/// perception agent.
pub trait PageUnderstanding: Send + Sync {
    /// Classify the page, `PageType::Unknown` when nothing matches.
    fn classify(&self, snapshot: &PageSnapshot) -> PageType;

    /// Assign a category to one interactive element.
    fn categorize(&self, element: &ElementDescriptor) -> ElementCategory;

    /// Named patterns present on the page (modal_window, pagination, ...).
    fn detect_patterns(&self, snapshot: &PageSnapshot) -> Vec<String>;

    /// Whether a modal dialog is currently open.
    fn modal_present(&self, snapshot: &PageSnapshot) -> bool;

    /// Whether pagination controls are present.
    fn pagination_present(&self, snapshot: &PageSnapshot) -> bool;

    /// Classifier confidence for its last classification style, in [0, 1].
    fn confidence(&self) -> f32 {
        0.5
    }
}

/// URL path fragments indicating a page type.
const URL_INDICATORS: &[(PageType, &[&str])] = &[
    (
        PageType::Catalog,
        &["/catalog", "/category", "/products", "/shop", "/store"],
    ),
    (PageType::Product, &["/product", "/item", "/p/"]),
    (PageType::Cart, &["/cart", "/basket", "/bag"]),
    (PageType::Checkout, &["/checkout", "/order", "/payment"]),
    (PageType::Search, &["/search", "/find", "/q="]),
    (PageType::Profile, &["/profile", "/account", "/settings"]),
    (PageType::Login, &["/login", "/signin", "/auth"]),
    (
        PageType::Confirmation,
        &["/confirmation", "/success", "/thank-you"],
    ),
];

/// Title/body keywords indicating a page type; a type needs at least two
/// matches before it wins, to keep single stray words from flipping the
/// classification.
const TEXT_INDICATORS: &[(PageType, &[&str])] = &[
    (
        PageType::Cart,
        &["cart", "basket", "your items", "shopping cart", "корзина"],
    ),
    (
        PageType::Checkout,
        &["checkout", "payment", "shipping", "оформление", "оплата"],
    ),
    (
        PageType::Product,
        &["buy", "purchase", "add to", "добавить в корзину"],
    ),
    (
        PageType::Catalog,
        &["catalog", "products", "categories", "каталог"],
    ),
];

const BUTTON_CLASS_HINTS: &[&str] = &["button", "btn", "click", "tap"];
const ACTION_KEYWORDS: &[&str] = &[
    "add", "buy", "purchase", "order", "cart", "добавить", "купить", "заказать", "в корзину",
];
const NAV_KEYWORDS: &[&str] = &["next", "prev", "back", "forward", "menu", "далее", "назад"];
const MODAL_CLASS_HINTS: &[&str] = &["modal", "dialog", "popup", "overlay", "lightbox"];
const PAGINATION_KEYWORDS: &[&str] = &[
    "next",
    "prev",
    "previous",
    "page",
    "load more",
    "показать ещё",
    "следующая",
    "предыдущая",
];
const QUANTITY_KEYWORDS: &[&str] = &[
    "increase",
    "decrease",
    "increment",
    "decrement",
    "quantity",
    "qty",
    "count",
    "увеличить",
    "уменьшить",
    "количество",
];
const QUANTITY_CLASS_HINTS: &[&str] = &[
    "quantity",
    "qty",
    "counter",
    "stepper",
    "amount",
    "number-spinner",
    "qty-selector",
];

/// Default provider: keyword heuristics over the snapshot, no selectors.
#[derive(Clone, Copy, Debug, Default)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    /// Path-and-after portion of a URL, so host names never match the
    /// path fragments ("shop.example" must not look like "/shop").
    fn url_path(url: &str) -> &str {
        let rest = url.split_once("://").map(|(_, rest)| rest).unwrap_or(url);
        rest.find('/').map(|i| &rest[i..]).unwrap_or("")
    }

    fn page_text(snapshot: &PageSnapshot) -> String {
        snapshot
            .clickable_elements
            .iter()
            .filter(|e| !e.text.is_empty())
            .map(|e| e.text.to_lowercase())
            .collect::<Vec<_>>()
            .join(" ")
    }

    fn quantity_controls_present(snapshot: &PageSnapshot) -> bool {
        for element in &snapshot.clickable_elements {
            let text = element.text.to_lowercase();
            let aria = element
                .attribute("aria-label")
                .unwrap_or_default()
                .to_lowercase();
            let classes = element.attribute("class").unwrap_or_default().to_lowercase();

            if QUANTITY_KEYWORDS.iter().any(|kw| text.contains(kw))
                || QUANTITY_KEYWORDS.iter().any(|kw| aria.contains(kw))
                || QUANTITY_CLASS_HINTS.iter().any(|kw| classes.contains(kw))
            {
                return true;
            }

            // Bare +/- buttons count unless they belong to navigation.
            let trimmed = text.trim();
            if matches!(trimmed, "+" | "-" | "(+)" | "(-)")
                && !["nav", "menu", "pagination"]
                    .iter()
                    .any(|nav| classes.contains(nav))
            {
                return true;
            }
        }
        false
    }
}

impl PageUnderstanding for KeywordClassifier {
    fn classify(&self, snapshot: &PageSnapshot) -> PageType {
        let url = snapshot.url.to_lowercase();
        let path = Self::url_path(&url);
        for (page_type, fragments) in URL_INDICATORS {
            if fragments.iter().any(|fragment| path.contains(fragment)) {
                return *page_type;
            }
        }

        let combined = format!("{} {}", snapshot.title.to_lowercase(), Self::page_text(snapshot));
        for (page_type, keywords) in TEXT_INDICATORS {
            let matches = keywords.iter().filter(|kw| combined.contains(*kw)).count();
            if matches >= 2 {
                return *page_type;
            }
        }

        PageType::Unknown
    }

    fn categorize(&self, element: &ElementDescriptor) -> ElementCategory {
        // The inspector's own categorization wins when it has one.
        if element.category != ElementCategory::Unknown {
            return element.category;
        }

        let tag = element.tag.to_lowercase();
        let text = element.text.to_lowercase();
        let classes = element.attribute("class").unwrap_or_default().to_lowercase();

        if tag == "button" || BUTTON_CLASS_HINTS.iter().any(|hint| classes.contains(hint)) {
            return ElementCategory::Button;
        }
        if tag == "a" || element.attribute("href").is_some() {
            return ElementCategory::Link;
        }
        if matches!(tag.as_str(), "input" | "textarea" | "select") {
            return ElementCategory::Input;
        }
        if ACTION_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            return ElementCategory::ActionButton;
        }
        if NAV_KEYWORDS.iter().any(|kw| text.contains(kw)) {
            return ElementCategory::Navigation;
        }
        ElementCategory::Unknown
    }

    fn detect_patterns(&self, snapshot: &PageSnapshot) -> Vec<String> {
        let mut patterns = Vec::new();

        if self.modal_present(snapshot) {
            patterns.push("modal_window".to_owned());
        }
        if self.pagination_present(snapshot) {
            patterns.push("pagination".to_owned());
        }
        if !snapshot.input_elements.is_empty() {
            patterns.push(format!("forms ({} found)", snapshot.input_elements.len()));
        }

        let text = Self::page_text(snapshot);
        if ["cart", "basket", "корзина"].iter().any(|kw| text.contains(kw)) {
            patterns.push("shopping_cart_present".to_owned());
        }
        if ["checkout", "payment", "оформление", "оплата"]
            .iter()
            .any(|kw| text.contains(kw))
        {
            patterns.push("checkout_flow".to_owned());
        }
        if Self::quantity_controls_present(snapshot) {
            patterns.push("quantity_controls_detected".to_owned());
        }

        patterns
    }

    fn modal_present(&self, snapshot: &PageSnapshot) -> bool {
        if snapshot.modal_present {
            return true;
        }
        snapshot.clickable_elements.iter().any(|element| {
            if element.attribute("role") == Some("dialog")
                || element.attribute("aria-modal") == Some("true")
            {
                return true;
            }
            let classes = element.attribute("class").unwrap_or_default().to_lowercase();
            MODAL_CLASS_HINTS.iter().any(|hint| classes.contains(hint))
        })
    }

    fn pagination_present(&self, snapshot: &PageSnapshot) -> bool {
        if snapshot.pagination_present {
            return true;
        }
        snapshot.clickable_elements.iter().any(|element| {
            let text = element.text.to_lowercase();
            let classes = element.attribute("class").unwrap_or_default().to_lowercase();
            PAGINATION_KEYWORDS.iter().any(|kw| text.contains(kw)) || classes.contains("pagin")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use std::collections::HashMap;

    fn element(tag: &str, text: &str, attrs: &[(&str, &str)]) -> ElementDescriptor {
        ElementDescriptor {
            index: None,
            tag: tag.to_owned(),
            text: text.to_owned(),
            category: ElementCategory::Unknown,
            attributes: attrs
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect::<HashMap<_, _>>(),
        }
    }

    #[test]
    fn url_fragments_classify_before_text() {
        let classifier = KeywordClassifier;
        let snapshot = PageSnapshot {
            url: "https://shop.example/cart".into(),
            title: "Catalog of products".into(),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&snapshot), PageType::Cart);
    }

    #[test]
    fn host_names_do_not_match_path_fragments() {
        let classifier = KeywordClassifier;
        let snapshot = PageSnapshot {
            url: "https://shop.example/p/42".into(),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&snapshot), PageType::Product);

        let bare_host = PageSnapshot {
            url: "https://shop.example".into(),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&bare_host), PageType::Unknown);
    }

    #[test]
    fn text_classification_needs_two_matches() {
        let classifier = KeywordClassifier;
        let one_match = PageSnapshot {
            url: "https://shop.example/xyz".into(),
            title: "checkout".into(),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&one_match), PageType::Unknown);

        let two_matches = PageSnapshot {
            url: "https://shop.example/xyz".into(),
            title: "checkout and payment".into(),
            ..Default::default()
        };
        assert_eq!(classifier.classify(&two_matches), PageType::Checkout);
    }

    #[test]
    fn categorize_uses_tag_then_text() {
        let classifier = KeywordClassifier;
        assert_eq!(
            classifier.categorize(&element("button", "OK", &[])),
            ElementCategory::Button
        );
        assert_eq!(
            classifier.categorize(&element("a", "Details", &[("href", "/p/1")])),
            ElementCategory::Link
        );
        assert_eq!(
            classifier.categorize(&element("input", "", &[])),
            ElementCategory::Input
        );
        assert_eq!(
            classifier.categorize(&element("div", "Add to cart", &[])),
            ElementCategory::ActionButton
        );
        assert_eq!(
            classifier.categorize(&element("div", "Back", &[])),
            ElementCategory::Navigation
        );
        assert_eq!(
            classifier.categorize(&element("div", "hello", &[])),
            ElementCategory::Unknown
        );
    }

    #[test]
    fn pre_categorized_elements_are_trusted() {
        let classifier = KeywordClassifier;
        let mut pre = element("div", "whatever", &[]);
        pre.category = ElementCategory::ActionButton;
        assert_eq!(classifier.categorize(&pre), ElementCategory::ActionButton);
    }

    #[test]
    fn modal_detected_from_aria_attributes() {
        let classifier = KeywordClassifier;
        let snapshot = PageSnapshot {
            url: "https://shop.example".into(),
            clickable_elements: vec![element("div", "Accept", &[("aria-modal", "true")])],
            ..Default::default()
        };
        assert!(classifier.modal_present(&snapshot));
        assert!(classifier
            .detect_patterns(&snapshot)
            .contains(&"modal_window".to_owned()));
    }

    #[test]
    fn quantity_controls_exclude_navigation_symbols() {
        let classifier = KeywordClassifier;
        let nav_plus = PageSnapshot {
            clickable_elements: vec![element("button", "+", &[("class", "nav-expand")])],
            ..Default::default()
        };
        assert!(!classifier
            .detect_patterns(&nav_plus)
            .contains(&"quantity_controls_detected".to_owned()));

        let qty_plus = PageSnapshot {
            clickable_elements: vec![element("button", "+", &[("class", "qty-selector")])],
            ..Default::default()
        };
        assert!(classifier
            .detect_patterns(&qty_plus)
            .contains(&"quantity_controls_detected".to_owned()));
    }
}

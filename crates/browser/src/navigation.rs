//! Agentic navigation (spec.md §4.E): starting from a URL and a query,
//! repeatedly extract page text, score it against the query, and if
//! coverage is still low pick the most promising interactive element to
//! act on next.

use std::collections::HashSet;

use crate::driver::{BrowserDriver, DriverError, ElementKind, InteractiveElement, SessionId};

const COVERAGE_STOP_THRESHOLD: f64 = 0.7;
const MAX_COLLECTED_PAGES: usize = 10;
const NAV_KEYWORDS: &[&str] = &[
    "details", "next", "more", "continue", "read more", "view", "learn more", "see more", "page",
];

#[derive(Debug, Clone)]
pub struct CollectedPage {
    pub locator: String,
    pub text: String,
    pub coverage: f64,
}

#[derive(Debug, Clone)]
pub struct NavigationState {
    pub current_locator: String,
    pub depth: usize,
    pub visited: HashSet<String>,
    pub collected_pages: Vec<CollectedPage>,
    pub steps: usize,
}

impl NavigationState {
    fn new(start_url: &str) -> Self {
        let mut visited = HashSet::new();
        visited.insert(start_url.to_owned());
        Self {
            current_locator: start_url.to_owned(),
            depth: 0,
            visited,
            collected_pages: Vec::new(),
            steps: 0,
        }
    }
}

fn tokenize(query: &str) -> HashSet<String> {
    query
        .to_lowercase()
        .split_whitespace()
        .filter(|t| t.len() > 2)
        .map(str::to_owned)
        .collect()
}

fn coverage(text: &str, query_tokens: &HashSet<String>) -> f64 {
    if query_tokens.is_empty() {
        return 0.0;
    }
    let lower = text.to_lowercase();
    let hits = query_tokens.iter().filter(|t| lower.contains(t.as_str())).count();
    hits as f64 / query_tokens.len() as f64
}

fn score_element(element: &InteractiveElement, query_tokens: &HashSet<String>) -> f64 {
    let lower_text = element.text.to_lowercase();
    let mut score: f64 = query_tokens
        .iter()
        .filter(|t| lower_text.contains(t.as_str()))
        .count() as f64;
    if NAV_KEYWORDS.iter().any(|kw| lower_text.contains(kw)) {
        score += 0.5;
    }
    // Links and buttons are more likely real navigation than bare fields.
    if matches!(element.kind, ElementKind::Link | ElementKind::Button) {
        score += 0.25;
    }
    score
}

fn pick_best<'a>(
    elements: &'a [InteractiveElement],
    query_tokens: &HashSet<String>,
) -> Option<&'a InteractiveElement> {
    elements
        .iter()
        .map(|e| (e, score_element(e, query_tokens)))
        .filter(|(_, score)| *score > 0.0)
        .max_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal))
        .map(|(e, _)| e)
}

/// Drive `driver`'s session through the state machine described above,
/// starting at `start_url`, hunting for `query`. `max_depth` defaults to 3
/// per spec.md §4.E; the step ceiling `3 * max_depth` and the 10-page cap
/// are both enforced regardless of `max_depth`'s value.
pub async fn navigate_agentically(
    driver: &dyn BrowserDriver,
    session: SessionId,
    start_url: &str,
    query: &str,
    max_depth: usize,
) -> Result<NavigationState, DriverError> {
    let query_tokens = tokenize(query);
    let mut state = NavigationState::new(start_url);
    let max_steps = 3 * max_depth.max(1);

    driver.navigate(session, start_url).await?;

    loop {
        let text = driver.extract_text(session).await?;
        let page_coverage = coverage(&text, &query_tokens);
        state.collected_pages.push(CollectedPage {
            locator: state.current_locator.clone(),
            text,
            coverage: page_coverage,
        });

        if page_coverage > COVERAGE_STOP_THRESHOLD && state.depth > 0 {
            break;
        }
        if state.depth >= max_depth {
            break;
        }
        if state.collected_pages.len() >= MAX_COLLECTED_PAGES {
            break;
        }
        if state.steps >= max_steps {
            break;
        }

        let elements = driver.find_interactive_elements(session).await?;
        let Some(chosen) = pick_best(&elements, &query_tokens) else {
            break;
        };

        match chosen.kind {
            ElementKind::Link | ElementKind::Button => {
                driver.click(session, &chosen.selector).await?;
            }
            ElementKind::Field => {
                driver.fill(session, &chosen.selector, query).await?;
            }
        }

        state.current_locator = chosen.selector.clone();
        state.visited.insert(chosen.selector.clone());
        state.depth += 1;
        state.steps += 1;
    }

    Ok(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn element(kind: ElementKind, text: &str) -> InteractiveElement {
        InteractiveElement {
            selector: format!("sel-{text}"),
            tag: "a".into(),
            text: text.to_owned(),
            kind,
        }
    }

    #[test]
    fn coverage_counts_token_overlap() {
        let tokens = tokenize("rust async runtime");
        let score = coverage("this page explains the rust async model in depth", &tokens);
        assert!(score > 0.0 && score <= 1.0);
    }

    #[test]
    fn pick_best_prefers_query_matching_link_over_unrelated_field() {
        let tokens = tokenize("pricing plans");
        let elements = vec![
            element(ElementKind::Field, "search the site"),
            element(ElementKind::Link, "view pricing plans"),
        ];
        let chosen = pick_best(&elements, &tokens).unwrap();
        assert_eq!(chosen.text, "view pricing plans");
    }

    #[test]
    fn pick_best_returns_none_when_nothing_scores() {
        let tokens = tokenize("pricing plans");
        let elements = vec![element(ElementKind::Field, "unrelated text here")];
        assert!(pick_best(&elements, &tokens).is_none());
    }
}

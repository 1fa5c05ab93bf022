//! Local search and filtering over synchronized records.
//!
//! Nothing here touches the service; filters run over a snapshot.

use crate::models::{Application, ApplicationStatus, Document, Faq, Project};
use fuzzy_matcher::{skim::SkimMatcherV2, FuzzyMatcher};

/// Text a record can be searched and grouped by
pub trait Searchable {
    fn search_fields(&self) -> Vec<&str>;

    fn category(&self) -> Option<&str> {
        None
    }
}

impl Searchable for Application {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.full_name.as_str(), self.email.as_str(), self.nik.as_str()]
    }
}

impl Searchable for Document {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.description.as_str()]
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }
}

impl Searchable for Faq {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.question.as_str(), self.answer.as_str()]
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }
}

impl Searchable for Project {
    fn search_fields(&self) -> Vec<&str> {
        vec![self.title.as_str(), self.description.as_str()]
    }

    fn category(&self) -> Option<&str> {
        Some(&self.category)
    }
}

/// Case-insensitive substring search plus an optional exact category
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecordFilter {
    pub query: Option<String>,
    /// `None` keeps every category
    pub category: Option<String>,
}

impl RecordFilter {
    pub fn new(query: Option<&str>, category: Option<&str>) -> Self {
        Self {
            query: query
                .map(str::trim)
                .filter(|q| !q.is_empty())
                .map(str::to_lowercase),
            category: category.map(str::to_string),
        }
    }

    pub fn matches<R: Searchable>(&self, record: &R) -> bool {
        if let Some(category) = &self.category {
            if record.category() != Some(category.as_str()) {
                return false;
            }
        }
        match &self.query {
            Some(query) => record
                .search_fields()
                .iter()
                .any(|field| field.to_lowercase().contains(query.as_str())),
            None => true,
        }
    }

    /// Matching records, in their original order
    pub fn apply<'a, R: Searchable>(&self, records: &'a [R]) -> Vec<&'a R> {
        records.iter().filter(|r| self.matches(*r)).collect()
    }
}

/// Distinct categories in first-seen order
pub fn categories<R: Searchable>(records: &[R]) -> Vec<String> {
    let mut seen: Vec<String> = Vec::new();
    for category in records.iter().filter_map(Searchable::category) {
        if !seen.iter().any(|c| c == category) {
            seen.push(category.to_string());
        }
    }
    seen
}

pub fn filter_status<'a>(
    applications: &'a [Application],
    status: Option<ApplicationStatus>,
) -> Vec<&'a Application> {
    applications
        .iter()
        .filter(|app| status.map_or(true, |s| app.status == s))
        .collect()
}

/// Records whose best field scores at least `threshold`, best first.
///
/// Short queries also match as plain substrings so they are not lost to
/// low fuzzy scores.
pub fn fuzzy_rank<'a, R: Searchable>(records: &'a [R], query: &str, threshold: i64) -> Vec<&'a R> {
    let query = query.trim();
    if query.is_empty() {
        return records.iter().collect();
    }
    let matcher = SkimMatcherV2::default().ignore_case();
    let needle = query.to_lowercase();
    let mut scored: Vec<(usize, i64)> = Vec::new();

    for (index, record) in records.iter().enumerate() {
        let fields = record.search_fields();
        let best = fields
            .iter()
            .filter_map(|field| matcher.fuzzy_match(field, query))
            .max();
        match best {
            Some(score) if score >= threshold => scored.push((index, score)),
            _ => {
                if query.len() <= 3 && fields.iter().any(|f| f.to_lowercase().contains(&needle)) {
                    scored.push((index, (query.len() * 10) as i64));
                }
            }
        }
    }

    // stable sort keeps snapshot order among equal scores
    scored.sort_by(|a, b| b.1.cmp(&a.1));
    scored.into_iter().map(|(index, _)| &records[index]).collect()
}

//! Query Enricher - 용어집 기반 쿼리 확장
//!
//! 엔트리마다 세 가지 규칙을 우선순위대로 검사하고, 첫 번째로 일치한 규칙에서 멈춥니다.
//!
//! 1. 약어: 경계(문자열 시작/끝, 공백, 구두점, 한글 문자)로 둘러싸인 약어 (대소문자 무시)
//!    → 영문, 국문 추가
//! 2. 영문: 대소문자 무시 부분 문자열 포함 → 약어, 국문 추가
//! 3. 국문: 정확한 부분 문자열 포함 → 약어, 영문 추가
//!
//! 결과는 엔트리 순서대로 이어붙인 뒤 최초 등장 순서를 유지하며 중복 제거합니다.

use std::collections::HashSet;
use std::sync::{Arc, OnceLock};

use regex::{Regex, RegexBuilder};

use super::store::{GlossaryEntry, GlossaryStore};

// ============================================================================
// Matchers
// ============================================================================

/// 엔트리별 사전 계산된 매칭 정보
#[derive(Debug)]
struct EntryMatcher {
    entry: GlossaryEntry,
    abbreviation: Option<Regex>,
    english_lower: String,
}

impl EntryMatcher {
    fn new(entry: &GlossaryEntry) -> Self {
        let abbreviation = if entry.abbreviation.is_empty() {
            None
        } else {
            match RegexBuilder::new(&regex::escape(&entry.abbreviation))
                .case_insensitive(true)
                .build()
            {
                Ok(re) => Some(re),
                Err(e) => {
                    tracing::warn!("Invalid abbreviation pattern {:?}: {}", entry.abbreviation, e);
                    None
                }
            }
        };

        Self {
            entry: entry.clone(),
            abbreviation,
            english_lower: entry.english.to_lowercase(),
        }
    }

    /// 일치한 규칙에 따라 관련 용어를 `out`에 추가
    fn collect(&self, query: &str, query_lower: &str, out: &mut Vec<String>) {
        let entry = &self.entry;

        let terms: [&str; 2] = if self
            .abbreviation
            .as_ref()
            .is_some_and(|re| abbreviation_matches(re, query))
        {
            [entry.english.as_str(), entry.korean.as_str()]
        } else if !self.english_lower.is_empty() && query_lower.contains(&self.english_lower) {
            [entry.abbreviation.as_str(), entry.korean.as_str()]
        } else if !entry.korean.is_empty() && query.contains(entry.korean.as_str()) {
            [entry.abbreviation.as_str(), entry.english.as_str()]
        } else {
            return;
        };

        out.extend(terms.iter().filter(|t| !t.is_empty()).map(|t| t.to_string()));
    }
}

/// 약어 경계 매칭
///
/// 약어 앞뒤가 문자열 끝이거나, 단어 문자가 아니거나, 한글 문자면 경계로 봅니다.
/// 라틴 약어 바로 뒤에 한글이 붙는 경우("GMP기준")도 일치합니다.
fn abbreviation_matches(pattern: &Regex, query: &str) -> bool {
    let mut start = 0;

    while start <= query.len() {
        let Some(m) = pattern.find_at(query, start) else {
            return false;
        };

        let before = query[..m.start()].chars().next_back();
        let after = query[m.end()..].chars().next();
        if is_boundary(before) && is_boundary(after) {
            return true;
        }

        // 겹치는 후보를 위해 한 글자만 전진
        let step = query[m.start()..].chars().next().map_or(1, char::len_utf8);
        start = m.start() + step;
    }

    false
}

fn is_boundary(c: Option<char>) -> bool {
    match c {
        None => true,
        Some(c) => !(c.is_alphanumeric() || c == '_') || is_hangul(c),
    }
}

/// 한글 음절/자모 여부
fn is_hangul(c: char) -> bool {
    matches!(c,
        '\u{AC00}'..='\u{D7A3}'   // 음절
        | '\u{1100}'..='\u{11FF}' // 자모
        | '\u{3130}'..='\u{318F}' // 호환 자모
    )
}

// ============================================================================
// QueryEnricher
// ============================================================================

/// 쿼리 확장기
///
/// 매처는 용어집이 처음 필요할 때 한 번 컴파일됩니다.
#[derive(Debug)]
pub struct QueryEnricher {
    store: Arc<GlossaryStore>,
    matchers: OnceLock<Vec<EntryMatcher>>,
}

impl QueryEnricher {
    pub fn new(store: Arc<GlossaryStore>) -> Self {
        Self {
            store,
            matchers: OnceLock::new(),
        }
    }

    /// 메모리상의 엔트리로 생성
    pub fn from_entries(entries: Vec<GlossaryEntry>) -> Self {
        Self::new(Arc::new(GlossaryStore::from_entries(entries)))
    }

    fn matchers(&self) -> &[EntryMatcher] {
        self.matchers
            .get_or_init(|| self.store.load().iter().map(EntryMatcher::new).collect())
    }

    /// 쿼리와 관련된 용어 목록
    ///
    /// 일치하는 엔트리가 없거나 용어집이 비어있으면 빈 목록을 반환합니다.
    pub fn find_related_terms(&self, query: &str) -> Vec<String> {
        let query_lower = query.to_lowercase();

        let mut candidates = Vec::new();
        for matcher in self.matchers() {
            matcher.collect(query, &query_lower, &mut candidates);
        }

        let mut seen = HashSet::with_capacity(candidates.len());
        candidates.retain(|term| seen.insert(term.clone()));
        candidates
    }

    /// 관련 용어를 붙인 쿼리
    pub fn enrich(&self, query: &str) -> String {
        enrich_query(query, &self.find_related_terms(query))
    }

    pub fn glossary(&self) -> &GlossaryStore {
        &self.store
    }
}

/// 원본 쿼리 뒤에 관련 용어 블록을 붙임 (용어가 없으면 원본 그대로)
pub fn enrich_query(query: &str, terms: &[String]) -> String {
    if terms.is_empty() {
        return query.to_string();
    }

    format!("{}\n\n[관련 용어: {}]", query, terms.join(", "))
}

// ============================================================================
// Tests
// ============================================================================

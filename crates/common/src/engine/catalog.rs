//! Entity catalog
//!
//! In-memory index of every entity name in the graph, used to turn free-text
//! mentions into canonical entities. Exact matches (aliases included) score
//! 1.0. Anything else is fuzzy-scored and kept only above the confidence floor.

use crate::config::EngineConfig;
use crate::errors::Result;
use crate::graph::{CatalogEntry, EntityKind, GraphStore};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

/// Highest score a fuzzy match can reach; 1.0 is reserved for exact matches
const MAX_FUZZY_CONFIDENCE: f32 = 0.99;

/// Shortest token considered for fuzzy matching
const MIN_FUZZY_CHARS: usize = 3;

/// A canonical entity a mention may refer to
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Resolution {
    pub name: String,
    pub kind: EntityKind,
    pub confidence: f32,
}

/// A span of the question that resolved to one or more entities
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Mention {
    /// Text as written in the question
    pub text: String,
    /// Token span `[start, end)`
    pub start: usize,
    pub end: usize,
    /// Never empty, best first
    pub candidates: Vec<Resolution>,
}

impl Mention {
    pub fn best(&self) -> Option<&Resolution> {
        self.candidates.first()
    }

    /// Candidates scoring within `margin` of the best one
    pub fn top_group(&self, margin: f32) -> impl Iterator<Item = &Resolution> {
        let floor = self.best().map_or(f32::MAX, |best| best.confidence - margin);
        self.candidates.iter().filter(move |c| c.confidence >= floor)
    }

    /// Whether the mention plausibly names an entity of `kind`
    pub fn is_kind(&self, kind: EntityKind, margin: f32) -> bool {
        self.top_group(margin).any(|c| c.kind == kind)
    }

    pub fn candidates_of(&self, kind: EntityKind) -> impl Iterator<Item = &Resolution> {
        self.candidates.iter().filter(move |c| c.kind == kind)
    }
}

#[derive(Debug)]
struct IndexedEntry {
    name: String,
    kind: EntityKind,
    normalized: String,
    tokens: Vec<String>,
}

/// Name index over every catalog entity
#[derive(Debug)]
pub struct EntityCatalog {
    entries: Vec<IndexedEntry>,
    /// normalized name -> entry indices (one name may exist under several kinds)
    exact: HashMap<String, Vec<usize>>,
    /// normalized alias -> normalized canonical name
    aliases: HashMap<String, String>,
    min_confidence: f32,
    /// Longest name or alias, in tokens
    max_tokens: usize,
}

impl EntityCatalog {
    pub fn new(entries: Vec<CatalogEntry>, config: &EngineConfig) -> Self {
        let mut catalog = Self {
            entries: Vec::with_capacity(entries.len()),
            exact: HashMap::new(),
            aliases: HashMap::new(),
            min_confidence: config.min_confidence,
            max_tokens: 1,
        };

        let mut seen = HashSet::new();
        for entry in entries {
            let normalized = normalize(&entry.name);
            if normalized.is_empty() || !seen.insert((normalized.clone(), entry.kind)) {
                continue;
            }
            let tokens: Vec<String> = normalized.split(' ').map(str::to_string).collect();
            catalog.max_tokens = catalog.max_tokens.max(tokens.len());
            catalog
                .exact
                .entry(normalized.clone())
                .or_default()
                .push(catalog.entries.len());
            catalog.entries.push(IndexedEntry {
                name: entry.name,
                kind: entry.kind,
                normalized,
                tokens,
            });
        }

        for (alias, target) in &config.aliases {
            let alias = normalize(alias);
            catalog.max_tokens = catalog.max_tokens.max(alias.split(' ').count());
            catalog.aliases.insert(alias, normalize(target));
        }

        catalog
    }

    /// Build the catalog from a bulk read of the store
    pub async fn load(store: &dyn GraphStore, config: &EngineConfig) -> Result<Self> {
        let entries = store.catalog_entries().await?;
        Ok(Self::new(entries, config))
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn count(&self, kind: EntityKind) -> usize {
        self.entries.iter().filter(|e| e.kind == kind).count()
    }

    /// Resolve a single mention, restricted to `kinds` (empty = any kind)
    ///
    /// Returns candidates best first: by confidence, then shorter name, then
    /// name. An empty result means nothing cleared the confidence floor.
    pub fn resolve(&self, mention: &str, kinds: &[EntityKind]) -> Vec<Resolution> {
        let normalized = normalize(mention);
        if normalized.is_empty() {
            return Vec::new();
        }

        let exact = self.exact_matches(&normalized, kinds);
        if !exact.is_empty() {
            return exact;
        }
        self.fuzzy_matches(&normalized, kinds)
    }

    /// Find every entity mention in a question
    ///
    /// Exact phrases are taken first, longest match wins. The remaining runs of
    /// content words are then matched fuzzily.
    pub fn scan(&self, question: &str) -> Vec<Mention> {
        let tokens = tokenize(question);
        let mut covered = vec![false; tokens.len()];
        let mut mentions = Vec::new();

        let mut i = 0;
        while i < tokens.len() {
            let longest = self.max_tokens.min(tokens.len() - i);
            let hit = (1..=longest).rev().find_map(|len| {
                if len == 1 && is_stop_word(&tokens[i].normalized) {
                    return None;
                }
                let found = self.exact_matches(&phrase(&tokens[i..i + len]), &[]);
                (!found.is_empty()).then_some((len, found))
            });

            match hit {
                Some((len, candidates)) => {
                    covered[i..i + len].iter_mut().for_each(|c| *c = true);
                    mentions.push(mention(&tokens, i, i + len, candidates));
                    i += len;
                }
                None => i += 1,
            }
        }

        let mut i = 0;
        while i < tokens.len() {
            if covered[i] || !is_content_token(&tokens[i].normalized) {
                i += 1;
                continue;
            }
            let mut run_end = i;
            while run_end < tokens.len() && !covered[run_end] && is_content_token(&tokens[run_end].normalized) {
                run_end += 1;
            }

            let longest = self.max_tokens.min(run_end - i);
            let hit = (1..=longest).rev().find_map(|len| {
                let found = self.fuzzy_matches(&phrase(&tokens[i..i + len]), &[]);
                (!found.is_empty()).then_some((len, found))
            });

            match hit {
                Some((len, candidates)) => {
                    mentions.push(mention(&tokens, i, i + len, candidates));
                    i += len;
                }
                None => i += 1,
            }
        }

        mentions.sort_by_key(|m| m.start);
        mentions
    }

    fn exact_matches(&self, normalized: &str, kinds: &[EntityKind]) -> Vec<Resolution> {
        let possessive = normalized.strip_suffix("'s");
        for key in std::iter::once(normalized).chain(possessive) {
            let via_alias = self.aliases.get(key).and_then(|target| self.exact.get(target));
            let mut found: Vec<Resolution> = self
                .exact
                .get(key)
                .into_iter()
                .chain(via_alias)
                .flatten()
                .map(|&index| &self.entries[index])
                .filter(|entry| accepts(kinds, entry.kind))
                .map(|entry| Resolution {
                    name: entry.name.clone(),
                    kind: entry.kind,
                    confidence: 1.0,
                })
                .collect();

            if !found.is_empty() {
                rank(&mut found);
                found.dedup_by(|a, b| a.name == b.name && a.kind == b.kind);
                return found;
            }
        }
        Vec::new()
    }

    fn fuzzy_matches(&self, normalized: &str, kinds: &[EntityKind]) -> Vec<Resolution> {
        let tokens: Vec<&str> = normalized.split(' ').collect();

        let mut found: Vec<Resolution> = self
            .entries
            .iter()
            .filter(|entry| accepts(kinds, entry.kind))
            .filter_map(|entry| {
                let score = edit_similarity(normalized, &entry.normalized)
                    .max(token_score(&tokens, &entry.tokens))
                    .min(MAX_FUZZY_CONFIDENCE);
                (score >= self.min_confidence).then(|| Resolution {
                    name: entry.name.clone(),
                    kind: entry.kind,
                    confidence: score,
                })
            })
            .collect();

        rank(&mut found);
        found
    }
}

fn accepts(kinds: &[EntityKind], kind: EntityKind) -> bool {
    kinds.is_empty() || kinds.contains(&kind)
}

fn rank(resolutions: &mut [Resolution]) {
    resolutions.sort_by(|a, b| {
        b.confidence
            .total_cmp(&a.confidence)
            .then_with(|| a.name.chars().count().cmp(&b.name.chars().count()))
            .then_with(|| a.name.cmp(&b.name))
            .then_with(|| a.kind.cmp(&b.kind))
    });
}

#[derive(Debug)]
struct Token {
    original: String,
    normalized: String,
}

fn tokenize(question: &str) -> Vec<Token> {
    question
        .split_whitespace()
        .filter_map(|word| {
            let normalized = normalize(word);
            (!normalized.is_empty()).then(|| Token {
                original: trim_punctuation(word).to_string(),
                normalized,
            })
        })
        .collect()
}

fn phrase(tokens: &[Token]) -> String {
    tokens
        .iter()
        .map(|t| t.normalized.as_str())
        .collect::<Vec<_>>()
        .join(" ")
}

fn mention(tokens: &[Token], start: usize, end: usize, candidates: Vec<Resolution>) -> Mention {
    Mention {
        text: tokens[start..end]
            .iter()
            .map(|t| t.original.as_str())
            .collect::<Vec<_>>()
            .join(" "),
        start,
        end,
        candidates,
    }
}

fn trim_punctuation(word: &str) -> &str {
    word.trim_matches(|c: char| matches!(c, '?' | '!' | ',' | '.' | ';' | ':' | '"' | '(' | ')' | '\'' | '`' | '\u{2018}' | '\u{2019}' | '\u{201c}' | '\u{201d}'))
}

/// Lowercase, unify apostrophes, strip surrounding punctuation and collapse whitespace
pub(crate) fn normalize(text: &str) -> String {
    text.split_whitespace()
        .map(|word| trim_punctuation(word).replace('\u{2019}', "'").to_lowercase())
        .filter(|word| !word.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}

/// Words that never start an entity mention on their own
pub(crate) fn is_stop_word(word: &str) -> bool {
    const STOP_WORDS: &[&str] = &[
        "a", "an", "the", "is", "are", "was", "were", "be", "been", "in", "on", "at", "to", "for",
        "of", "with", "by", "from", "and", "or", "but", "not", "this", "that", "these", "those",
        "it", "its", "as", "do", "does", "did", "has", "have", "had", "can", "could", "will",
        "would", "should", "me", "i", "you", "we", "they", "their", "them", "there", "please",
        "what", "which", "who", "whom", "where", "when", "how", "why", "tell", "about", "give",
        "show", "list", "find", "name", "names", "know", "any", "all", "each", "every", "other",
        "than", "more", "also", "both", "between", "vs", "versus", "compare", "comparison",
        "company", "companies", "startup", "startups", "unicorn", "unicorns", "investor",
        "investors", "vc", "vcs", "fund", "funds", "sector", "sectors", "industry", "industries",
        "city", "cities", "location", "locations", "valuation", "valuations", "valued",
        "valuable", "worth", "top", "most", "highest", "largest", "biggest", "best", "leading",
        "total", "sum", "average", "avg", "mean", "count", "many", "much", "number", "breakdown",
        "per", "similar", "like", "alternatives", "competitors", "peers", "rivals", "comparable",
        "connected", "connection", "connections", "path", "link", "linked", "related",
        "relationship", "invested", "invest", "investing", "investment", "investments",
        "portfolio", "backed", "funded", "located", "based", "headquartered", "shared",
        "together", "alongside", "co-invest", "co-invested", "co-investors", "co-investor",
        "growth", "grew", "entry", "current", "currently", "active",
    ];
    STOP_WORDS.contains(&word)
}

fn is_content_token(word: &str) -> bool {
    !is_stop_word(word)
        && word.chars().count() >= MIN_FUZZY_CHARS
        && !word.chars().all(|c| c.is_ascii_digit())
}

/// Normalized edit similarity: `1 - distance / longer length`
fn edit_similarity(a: &str, b: &str) -> f32 {
    let longer = a.chars().count().max(b.chars().count());
    if longer == 0 {
        return 1.0;
    }
    1.0 - levenshtein(a, b) as f32 / longer as f32
}

fn levenshtein(a: &str, b: &str) -> usize {
    let b: Vec<char> = b.chars().collect();
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0; b.len() + 1];

    for (i, ca) in a.chars().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != *cb);
            current[j + 1] = substitution.min(previous[j + 1] + 1).min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}

/// Token-level score
///
/// A mention that is a leading prefix of the name ("Tiger" for "Tiger Global")
/// scores `0.6 + 0.4 * covered share`; otherwise the Jaccard overlap of tokens.
fn token_score(mention: &[&str], name: &[String]) -> f32 {
    if mention.is_empty() || name.is_empty() {
        return 0.0;
    }
    if mention.len() <= name.len() && mention.iter().zip(name).all(|(m, n)| *m == n.as_str()) {
        return 0.6 + 0.4 * mention.len() as f32 / name.len() as f32;
    }

    let left: HashSet<&str> = mention.iter().copied().collect();
    let right: HashSet<&str> = name.iter().map(String::as_str).collect();
    let union = left.union(&right).count();
    if union == 0 {
        return 0.0;
    }
    left.intersection(&right).count() as f32 / union as f32
}

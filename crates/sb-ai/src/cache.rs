//! Semantic response cache
//!
//! Responses are keyed by a normalised form of the question: lowercase,
//! NFD with combining marks stripped, punctuation removed, whitespace
//! collapsed, function words dropped. Two phrasings that normalise to the
//! same string share one entry. Categories carry distinct TTLs and
//! transient patterns take precedence over FAQ ones. Eviction removes the
//! lowest-scoring tenth by `hits / age` so heavily-used entries survive.

use std::sync::OnceLock;
use std::time::Duration;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use regex::Regex;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tracing::debug;
use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Cache category, determines the TTL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CacheCategory {
    Faq,
    General,
    Transient,
}

/// Closed list of function words dropped during normalisation.
const FUNCTION_WORDS: &[&str] = &[
    "el", "la", "los", "las", "un", "una", "unos", "unas", "de", "del", "al", "a", "en", "que",
    "y", "o", "u", "es", "son", "por", "para", "con", "mi", "tu", "su", "lo", "se", "me", "te",
    "le", "nos",
];

/// Patterns that mark a question as time-sensitive. These take precedence
/// over the FAQ families.
const TRANSIENT_MARKERS: &[&str] = &[
    "hoy",
    "ahora",
    "ahorita",
    "mi pedido",
    "mi orden",
    "en este momento",
    "todavia",
    "ya casi",
];

fn faq_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(
            r"horario|abren|cierran|precio|cuesta|costo|envio|enviar|domicilio|donde|ubicacion|sucursal|menu|factura|pago|tarjeta|como compro|como pedir",
        )
        .expect("valid regex")
    })
}

/// Responses that look like apologies or errors are never cached.
const UNCACHEABLE_MARKERS: &[&str] = &[
    "lo siento",
    "lo sentimos",
    "disculpa",
    "perdona",
    "no puedo",
    "hubo un problema",
    "error",
    "sorry",
];

/// A stored cache entry.
#[derive(Debug, Clone)]
struct CacheEntry {
    question: String,
    response: String,
    category: CacheCategory,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    hits: u64,
    metadata: serde_json::Value,
}

/// A successful lookup.
#[derive(Debug, Clone)]
pub struct CacheHit {
    pub response: String,
    pub metadata: serde_json::Value,
    pub category: CacheCategory,
    pub cache_age_secs: i64,
}

/// Cache configuration.
#[derive(Debug, Clone)]
pub struct SemanticCacheConfig {
    pub max_entries: usize,
    pub ttl_faq: Duration,
    pub ttl_general: Duration,
    pub ttl_transient: Duration,
}

impl Default for SemanticCacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 5000,
            ttl_faq: Duration::from_secs(86_400),
            ttl_general: Duration::from_secs(14_400),
            ttl_transient: Duration::from_secs(1800),
        }
    }
}

/// Normalise a question for keying.
pub fn normalize(question: &str) -> String {
    let lowered = question.to_lowercase();

    // NFD decomposition, then drop combining marks (accents).
    let unaccented: String = lowered.nfd().filter(|c| !is_combining_mark(*c)).collect();

    // Punctuation to spaces, collapse whitespace.
    let mut cleaned = String::with_capacity(unaccented.len());
    let mut last_was_space = true;
    for ch in unaccented.chars() {
        if ch.is_alphanumeric() {
            cleaned.push(ch);
            last_was_space = false;
        } else if !last_was_space {
            cleaned.push(' ');
            last_was_space = true;
        }
    }

    cleaned
        .split_whitespace()
        .filter(|word| !FUNCTION_WORDS.contains(word))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Cache key: first 16 hex characters of SHA-256 over the normalised form.
pub fn cache_key(question: &str) -> String {
    let normalized = normalize(question);
    let digest = Sha256::digest(normalized.as_bytes());
    hex::encode(digest)[..16].to_string()
}

fn categorize(normalized: &str) -> CacheCategory {
    if TRANSIENT_MARKERS.iter().any(|m| normalized.contains(m)) {
        return CacheCategory::Transient;
    }
    if faq_re().is_match(normalized) {
        return CacheCategory::Faq;
    }
    CacheCategory::General
}

/// In-process semantic cache with TTL and score-based eviction.
pub struct SemanticCache {
    entries: DashMap<String, CacheEntry>,
    config: SemanticCacheConfig,
}

impl SemanticCache {
    pub fn new(config: SemanticCacheConfig) -> Self {
        Self {
            entries: DashMap::new(),
            config,
        }
    }

    fn ttl_for(&self, category: CacheCategory) -> Duration {
        match category {
            CacheCategory::Faq => self.config.ttl_faq,
            CacheCategory::General => self.config.ttl_general,
            CacheCategory::Transient => self.config.ttl_transient,
        }
    }

    /// Look up a question. Expired entries are deleted lazily and never
    /// returned.
    pub fn get(&self, question: &str) -> Option<CacheHit> {
        let key = cache_key(question);
        let now = Utc::now();

        let expired = match self.entries.get_mut(&key) {
            Some(mut entry) => {
                if entry.expires_at <= now {
                    true
                } else {
                    entry.hits += 1;
                    return Some(CacheHit {
                        response: entry.response.clone(),
                        metadata: entry.metadata.clone(),
                        category: entry.category,
                        cache_age_secs: (now - entry.created_at).num_seconds(),
                    });
                }
            }
            None => return None,
        };

        if expired {
            self.entries.remove(&key);
        }
        None
    }

    /// Store a response. Refuses responses that look like apologies or
    /// errors and returns `None`; otherwise returns the entry key.
    pub fn set(
        &self,
        question: &str,
        response: &str,
        metadata: serde_json::Value,
    ) -> Option<String> {
        let response_lower = response.to_lowercase();
        if UNCACHEABLE_MARKERS.iter().any(|m| response_lower.contains(m)) {
            debug!("Refusing to cache apology/error-looking response");
            return None;
        }

        if self.entries.len() >= self.config.max_entries {
            self.evict_lowest_decile();
        }

        let normalized = normalize(question);
        let category = categorize(&normalized);
        let key = cache_key(question);
        let now = Utc::now();
        let ttl = self.ttl_for(category);

        self.entries.insert(
            key.clone(),
            CacheEntry {
                question: normalized,
                response: response.to_string(),
                category,
                created_at: now,
                expires_at: now + chrono::Duration::from_std(ttl).unwrap_or_default(),
                hits: 0,
                metadata,
            },
        );

        Some(key)
    }

    /// Drop the entry for one question.
    pub fn invalidate(&self, question: &str) -> bool {
        self.entries.remove(&cache_key(question)).is_some()
    }

    /// Drop every entry whose normalised question matches the pattern.
    pub fn invalidate_pattern(&self, pattern: &Regex) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| !pattern.is_match(&entry.question));
        before - self.entries.len()
    }

    /// Drop every entry of one category.
    pub fn invalidate_category(&self, category: CacheCategory) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.category != category);
        before - self.entries.len()
    }

    pub fn clear(&self) {
        self.entries.clear();
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Remove expired entries. Returns how many were dropped.
    pub fn purge_expired(&self) -> usize {
        let now = Utc::now();
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.expires_at > now);
        let removed = before - self.entries.len();
        if removed > 0 {
            debug!(removed = removed, "Purged expired cache entries");
        }
        removed
    }

    /// Start the periodic expired-entry sweep.
    pub fn start_sweeper(self: &std::sync::Arc<Self>, interval: Duration) {
        let cache = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                cache.purge_expired();
            }
        });
    }

    /// Evict the lowest-scoring 10 % of entries, score = hits / age.
    fn evict_lowest_decile(&self) {
        let now = Utc::now();
        let mut scored: Vec<(String, f64)> = self
            .entries
            .iter()
            .map(|entry| {
                let age_secs = (now - entry.created_at).num_seconds().max(1) as f64;
                (entry.key().clone(), entry.hits as f64 / age_secs)
            })
            .collect();

        let to_remove = (scored.len() / 10).max(1);
        scored.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));

        for (key, _) in scored.into_iter().take(to_remove) {
            self.entries.remove(&key);
        }
        debug!(removed = to_remove, "Evicted low-score cache entries");
    }
}

impl Default for SemanticCache {
    fn default() -> Self {
        Self::new(SemanticCacheConfig::default())
    }
}

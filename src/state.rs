use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use crate::config::AppConfig;
use crate::db::SqliteStore;
use crate::models::LlmProviderKind;
use crate::services::ai::provider_for;
use crate::services::analysis::AnalysisPipeline;
use crate::services::booking::BookingPolicy;
use crate::services::calendar::{CalendarFactory, CalendarRegistry};
use crate::services::config_resolver::ConfigResolver;
use crate::services::knowledge::KnowledgeBase;
use crate::services::session::finalize::CallRecordSink;
use crate::services::transfer::TelephonyControl;
use crate::services::usage::{HttpUsageBackend, UsageGuard};
use crate::services::webhook::{HttpWebhook, WebhookSink};

/// Process-wide collaborators shared by every call session.
pub struct AppState {
    pub config: AppConfig,
    pub resolver: ConfigResolver,
    pub usage: UsageGuard,
    pub analysis: AnalysisPipeline,
    pub records: Arc<dyn CallRecordSink>,
    pub webhook: Arc<dyn WebhookSink>,
    pub calendars: Arc<dyn CalendarFactory>,
    pub knowledge: Option<Arc<dyn KnowledgeBase>>,
    pub telephony: Option<Arc<dyn TelephonyControl>>,
    pub booking_policy: BookingPolicy,
}

impl AppState {
    /// Wires the production backends around one SQLite store. Knowledge
    /// search and SIP transfer are host-provided and start out unset.
    pub fn new(config: AppConfig, store: Arc<SqliteStore>) -> Self {
        let usage = if config.usage_api_url.is_empty() {
            tracing::info!("no usage API configured, minute quota disabled");
            UsageGuard::disabled()
        } else {
            UsageGuard::new(Some(Arc::new(HttpUsageBackend::new(
                config.usage_api_url.clone(),
                config.usage_api_key.clone(),
            ))))
        };

        let analysis_llm = match provider_for(LlmProviderKind::OpenAi, &config.analysis_model, &config) {
            Ok(llm) => Some(llm),
            Err(e) => {
                tracing::warn!(error = %e, "analysis model unavailable, using heuristics only");
                None
            }
        };

        Self {
            resolver: ConfigResolver::new(store.clone()),
            usage,
            analysis: AnalysisPipeline::new(analysis_llm),
            records: store,
            webhook: Arc::new(HttpWebhook::new()),
            calendars: Arc::new(CalendarRegistry),
            knowledge: None,
            telephony: None,
            booking_policy: BookingPolicy::default(),
            config,
        }
    }
}

/// Locks a per-session mutex, recovering the data if a holder panicked.
pub fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

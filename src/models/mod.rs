pub mod assistant;
pub mod booking;
pub mod call_record;
pub mod routing;
pub mod usage;

pub use assistant::{
    AnalysisSettings, AssistantConfig, BookingCredentials, BookingProviderKind, CallLimits,
    LlmProviderKind, LlmSettings, StructuredField, SttProviderKind, TransferSettings,
    TtsProviderKind,
};
pub use booking::{Appointment, BookingPhase, BookingState, ReservationRequest, Slot};
pub use call_record::{AnalysisResult, CallRecord, EndReason, RawTranscriptItem, TranscriptItem};
pub use routing::{CallClass, Metadata, RoutingInfo};
pub use usage::{DeductionOutcome, MinutesBalance, QuotaStatus};

pub mod domain;
pub mod ports;
pub mod schema;

pub use domain::{
    parse_calendar_date, parse_clock_time, AspectRatio, Attachment, ChatRequest, ChatRole,
    ChatTurn, EntryType, Expiry, OperationHandle, OperationStatus, ProfilePatch, ScheduleDraft,
    ScheduleEntry, Session, StudyGoal, Timestamp, UserProfile, VideoRequest, DEFAULT_REGION,
};
pub use ports::{
    AuthProvider, ChatService, CollectionPath, CollectionSnapshot, Document, DocumentPath,
    DocumentSnapshot, DocumentStore, PortError, PortResult, SessionStream, SnapshotStream,
    StoredDocument, TextStream, VideoService,
};

pub mod billing;
pub mod domain;
pub mod ingestion;
pub mod pipeline;
pub mod ports;
pub mod sharing;
pub mod usage;

#[cfg(any(test, feature = "testing"))]
pub mod testing;

pub use domain::{
    Document, DocumentDomain, DocumentListing, DocumentResult, EmailMessage, ExportFormat, NewUser,
    Role, Share, SubscriptionPlan, SubscriptionStatus, Summary, UsageSnapshot, User,
};
pub use ports::{
    BlobStorage, CheckoutProvider, DatabaseService, EmailService, GenerationInput,
    GenerationRequest, PortError, PortResult, RawTranslation, StoredBlob, TextExtractor,
    TranslationService,
};

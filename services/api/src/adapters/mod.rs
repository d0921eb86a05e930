pub mod blob;
pub mod db;
pub mod email;
pub mod mock;
pub mod pdf;
pub mod stripe;
pub mod stripe_checkout;
pub mod translation_llm;

pub use blob::VercelBlobAdapter;
pub use db::DbAdapter;
pub use email::ResendEmailAdapter;
pub use mock::{LogEmailAdapter, MockBlobStorage, MockCheckoutProvider, MockTranslationAdapter};
pub use pdf::PdfTextExtractor;
pub use stripe_checkout::StripeCheckoutAdapter;
pub use translation_llm::OpenAiTranslationAdapter;

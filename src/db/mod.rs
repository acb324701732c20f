pub mod api_tokens;
pub mod attachments;
pub mod audit;
pub mod instances;
pub mod users;
pub mod xforms;

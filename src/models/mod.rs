mod attachment;
mod audit_event;
mod instance;
mod user;
mod xform;

pub use attachment::{Attachment, AttachmentInfo};
pub use audit_event::AuditEvent;
pub use instance::Instance;
pub use user::User;
pub use xform::{FieldDef, XForm};

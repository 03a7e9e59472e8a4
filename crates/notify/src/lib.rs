//! Outbound digest email: the sender seam, the SMTP implementation, and
//! locale-keyed templates.

pub mod email;
pub mod templating;
pub mod traits;

pub use email::SmtpSender;
pub use templating::{render_digest, DigestContext, DigestLine, RenderedDigest};
pub use traits::{DigestSender, NotifyError, OutboundEmail};

//! V1 API handlers.

mod accounts;
mod attachments;
mod groups;
mod identities;
mod link;
mod messages;
mod profiles;

pub use accounts::{register, verify};
pub use attachments::{delete_attachment, list_attachments, serve_attachment};
pub use groups::{
    block_group, create_group, delete_group, get_group, join_group, list_groups, quit_group,
};
pub use identities::{list_identities, trust_identity};
pub use link::qrcode_link;
pub use messages::{receive, send, send_reaction};
pub use profiles::update_profile;

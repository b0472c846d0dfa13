pub mod link;
pub mod user;

pub use link::{
    unix_now, CreateLink, CreateLinkRequest, Link, LinkDraft, LinkPatch, LinkStats, NewLink,
    UpdateLinkRequest,
};
pub use user::{Credentials, TokenResponse, User};

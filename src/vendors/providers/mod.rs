//! Vendor adapter implementations

pub mod clubkonnect;
pub mod vtpass;

pub use clubkonnect::ClubKonnectAdapter;
pub use vtpass::VtPassAdapter;

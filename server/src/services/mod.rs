pub mod booking;
pub mod coupons;
pub mod locks;
pub mod pricing;
pub mod reconciler;

pub use reconciler::{InquiryReport, Reconciler, ReconcilerPolicy, RefundDecision};

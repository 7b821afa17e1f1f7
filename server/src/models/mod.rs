pub mod catalog;
pub mod coupon;
pub mod refund;
pub mod ticket;

pub use catalog::{AddOn, AddOnSelection, PartyPricing, PriceTier, PricingCatalogEntry};
pub use coupon::{Coupon, CouponStatus, DiscountKind, DiscountRule, NewCoupon};
pub use refund::{RefundRequest, RefundStatus};
pub use ticket::{normalize_email, PaymentMethod, PaymentStatus, Ticket, TicketStatus};

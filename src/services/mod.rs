pub mod auth;
pub mod user;
pub mod room;
pub mod bookmark;
pub mod appointment;
pub mod message;
pub mod payout;
pub mod payment;
pub mod disbursement;
pub mod review;
pub mod report;

pub use auth::AuthService;
pub use user::UserService;
pub use room::RoomService;
pub use bookmark::BookmarkService;
pub use appointment::AppointmentService;
pub use message::MessageService;
pub use payout::PayoutService;
pub use payment::PaymentService;
pub use disbursement::{DisbursementService, ProcessSummary};
pub use review::ReviewService;
pub use report::ReportService;

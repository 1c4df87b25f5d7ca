//! Services module
//!
//! Lógica de negocio: reservas, cobros, notificaciones y mantenimiento.

pub mod booking_service;
pub mod notifier;
pub mod payment_service;
pub mod sweeper;

pub use booking_service::BookingService;
pub use notifier::{dispatch, InMemoryNotifier, Notifier};
pub use payment_service::{PaymentFlowStatus, PaymentOutcome, PaymentService};
pub use sweeper::{run_sweep, spawn_sweeper, SweepReport};

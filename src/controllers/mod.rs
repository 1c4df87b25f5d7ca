//! Controladores: autorización por recurso y validación de DTOs

pub mod booking_controller;
pub mod maintenance_controller;
pub mod payment_controller;

pub use booking_controller::BookingController;
pub use maintenance_controller::MaintenanceController;
pub use payment_controller::PaymentController;

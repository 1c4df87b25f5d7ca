pub mod booking_routes;
pub mod car_routes;
pub mod maintenance_routes;
pub mod payment_routes;

//! Modelo de Car y disponibilidad de inventario

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::models::booking::{Booking, DateRange};

/// Coche de una sucursal; `quantity` es el número de unidades idénticas
#[derive(Debug, Clone, Serialize, Deserialize, FromRow)]
pub struct Car {
    pub id: Uuid,
    pub branch_id: Uuid,
    pub display_name: String,
    pub quantity: i32,
    /// Tarifa de catálogo que paga un cliente
    pub daily_rate: Decimal,
}

/// Disponibilidad de un coche en un rango
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Availability {
    pub car_id: Uuid,
    pub quantity: i32,
    pub overlapping: i64,
    pub available: i64,
}

impl Availability {
    pub fn new(car: &Car, overlapping: i64) -> Self {
        Self {
            car_id: car.id,
            quantity: car.quantity,
            overlapping,
            available: (i64::from(car.quantity) - overlapping).max(0),
        }
    }

    /// Cuenta las reservas que ocupan capacidad y se solapan con `range`
    pub fn compute<'a>(
        car: &Car,
        range: &DateRange,
        bookings: impl IntoIterator<Item = &'a Booking>,
        exclude: Option<Uuid>,
    ) -> Self {
        let overlapping = bookings
            .into_iter()
            .filter(|b| b.car_id == car.id)
            .filter(|b| Some(b.id) != exclude)
            .filter(|b| b.status.is_capacity_consuming())
            .filter(|b| b.range().overlaps(range))
            .count();

        Self::new(car, overlapping as i64)
    }

    pub fn is_available(&self) -> bool {
        self.available > 0
    }
}

use uuid::Uuid;
use validator::Validate;

use crate::dto::api_response::ApiResponse;
use crate::dto::booking_dto::{
    ApproveBookingRequest, AvailabilityQuery, AvailabilityResponse, BookingResponse,
    CancelBookingRequest, CreateBookingRequest, RejectBookingRequest,
};
use crate::dto::payment_dto::{ManualPaymentRequest, PaymentResponse, RefundRequest};
use crate::models::auth::AuthenticatedUser;
use crate::models::booking::{BookingStatus, DateRange, NewBooking, PreApproval};
use crate::models::payment::ManualPayment;
use crate::services::BookingService;
use crate::state::AppState;
use crate::utils::errors::{forbidden_error, AppError};

/// Autorización por fila sobre reservas y su libro de pagos
pub struct BookingController {
    service: BookingService,
}

impl BookingController {
    pub fn new(state: &AppState) -> Self {
        Self {
            service: state.booking_service(),
        }
    }

    pub async fn create(
        &self,
        user: &AuthenticatedUser,
        request: CreateBookingRequest,
    ) -> Result<ApiResponse<BookingResponse>, AppError> {
        request.validate()?;
        let range = DateRange::new(request.start_date, request.end_date)?;
        let car = self.service.get_car(request.car_id).await?;

        let (customer_id, daily_rate, pre_approval) = if user.is_staff() {
            user.ensure_manages(request.branch_id, "create booking")?;
            let customer_id = request.customer_id.ok_or_else(|| {
                AppError::BadRequest("customerId is required when staff create a booking".to_string())
            })?;

            let pre_approval = match request.initial_status {
                None | Some(BookingStatus::Pending) => None,
                Some(BookingStatus::Confirmed) => Some(PreApproval {
                    approved_by: user.user_id,
                    deadline_hours: request
                        .payment_deadline_hours
                        .unwrap_or(self.service.default_deadline_hours()),
                }),
                Some(other) => {
                    return Err(AppError::BadRequest(format!(
                        "initial status '{}' is not allowed",
                        other
                    )))
                }
            };
            (customer_id, request.daily_rate.unwrap_or(car.daily_rate), pre_approval)
        } else {
            if request.customer_id.is_some_and(|id| id != user.user_id) {
                return Err(forbidden_error("create booking", "customers can only book for themselves"));
            }
            if !matches!(request.initial_status, None | Some(BookingStatus::Pending)) {
                return Err(forbidden_error("create booking", "only staff can pre-approve bookings"));
            }
            if !request.discount_amount.is_zero() {
                return Err(forbidden_error("create booking", "only staff can grant discounts"));
            }
            if request.daily_rate.is_some_and(|rate| rate != car.daily_rate) {
                return Err(forbidden_error("create booking", "only staff can set the daily rate"));
            }
            (user.user_id, car.daily_rate, None)
        };

        let booking = self
            .service
            .create_booking(NewBooking {
                branch_id: request.branch_id,
                car_id: request.car_id,
                customer_id,
                daily_rate,
                range,
                rental_type: request.rental_type,
                discount_amount: request.discount_amount,
                notes: request.notes,
                pre_approval,
            })
            .await?;

        let message = match booking.status {
            BookingStatus::Confirmed => "Booking created and approved",
            _ => "Booking created, awaiting approval",
        };
        Ok(ApiResponse::success_with_message(booking.into(), message))
    }

    pub async fn get(&self, user: &AuthenticatedUser, id: Uuid) -> Result<BookingResponse, AppError> {
        let booking = self.service.get_booking(id).await?;
        user.ensure_can_view(&booking)?;
        Ok(booking.into())
    }

    pub async fn approve(
        &self,
        user: &AuthenticatedUser,
        id: Uuid,
        request: ApproveBookingRequest,
    ) -> Result<ApiResponse<BookingResponse>, AppError> {
        request.validate()?;
        let booking = self.service.get_booking(id).await?;
        user.ensure_manages(booking.branch_id, "approve booking")?;

        let booking = self
            .service
            .approve_booking(id, user.user_id, request.payment_deadline_hours)
            .await?;
        Ok(ApiResponse::success_with_message(booking.into(), "Booking approved"))
    }

    pub async fn reject(
        &self,
        user: &AuthenticatedUser,
        id: Uuid,
        request: RejectBookingRequest,
    ) -> Result<ApiResponse<BookingResponse>, AppError> {
        request.validate()?;
        let booking = self.service.get_booking(id).await?;
        user.ensure_manages(booking.branch_id, "reject booking")?;

        let booking = self.service.reject_booking(id, &request.reason).await?;
        Ok(ApiResponse::success_with_message(booking.into(), "Booking rejected"))
    }

    /// El propietario se comprueba dentro de la transición
    pub async fn cancel(
        &self,
        user: &AuthenticatedUser,
        id: Uuid,
        request: CancelBookingRequest,
    ) -> Result<ApiResponse<BookingResponse>, AppError> {
        request.validate()?;
        let booking = self
            .service
            .cancel_booking(id, user.user_id, request.notes.as_deref())
            .await?;
        Ok(ApiResponse::success_with_message(booking.into(), "Booking cancelled"))
    }

    pub async fn availability(
        &self,
        car_id: Uuid,
        query: AvailabilityQuery,
    ) -> Result<AvailabilityResponse, AppError> {
        let range = DateRange::new(query.start_date, query.end_date)?;
        let availability = self.service.availability(car_id, range).await?;
        Ok(AvailabilityResponse::new(availability, query.start_date, query.end_date))
    }

    pub async fn list_payments(
        &self,
        user: &AuthenticatedUser,
        booking_id: Uuid,
    ) -> Result<Vec<PaymentResponse>, AppError> {
        let booking = self.service.get_booking(booking_id).await?;
        user.ensure_can_view(&booking)?;

        let payments = self.service.list_payments(booking_id).await?;
        Ok(payments.into_iter().map(PaymentResponse::from).collect())
    }

    pub async fn add_manual_payment(
        &self,
        user: &AuthenticatedUser,
        booking_id: Uuid,
        request: ManualPaymentRequest,
    ) -> Result<ApiResponse<PaymentResponse>, AppError> {
        user.ensure_admin("record manual payment")?;
        request.validate()?;

        let payment = self
            .service
            .add_manual_payment(
                booking_id,
                ManualPayment {
                    amount: request.amount,
                    method: request.method,
                    transaction_reference: request.transaction_reference,
                    notes: request.notes,
                    recorded_by: user.user_id,
                },
            )
            .await?;
        Ok(ApiResponse::success_with_message(payment.into(), "Manual payment recorded"))
    }

    pub async fn refund(
        &self,
        user: &AuthenticatedUser,
        payment_id: Uuid,
        request: RefundRequest,
    ) -> Result<ApiResponse<PaymentResponse>, AppError> {
        user.ensure_admin("refund payment")?;
        request.validate()?;

        let payment = self
            .service
            .refund_payment(payment_id, request.amount, &request.reason)
            .await?;
        Ok(ApiResponse::success_with_message(payment.into(), "Refund processed"))
    }
}

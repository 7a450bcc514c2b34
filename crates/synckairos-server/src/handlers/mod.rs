//! REST handlers, one module per resource. Handlers stay thin: decode,
//! call the service, map errors through `AppError`.

pub mod health;
pub mod participants;
pub mod sessions;
pub mod time;

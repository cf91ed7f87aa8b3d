use actix_web::{error::BlockingError, http::StatusCode, HttpResponse, ResponseError};
use derive_more::Display;
use diesel::result::{DatabaseErrorKind, Error as DBError};
use log::error;
use serde_json::json;

#[derive(Debug, Display)]
pub enum ServiceError {
    #[display(fmt = "Internal Server Error: {}", _0)]
    InternalServerError(String),

    #[display(fmt = "Bad Request: {}", _0)]
    BadRequest(String),

    #[display(fmt = "{} Not Found", _0)]
    NotFound(String),

    #[display(fmt = "Unauthorized")]
    Unauthorized,

    #[display(fmt = "Wrong Password")]
    WrongPassword,

    #[display(fmt = "Login Required")]
    LoginRequired,

    #[display(fmt = "{} Already Present", _0)]
    AlreadyPresent(String),
}

impl ServiceError {
    pub fn missing_fields() -> ServiceError {
        ServiceError::BadRequest("Missing required fields".to_string())
    }
}

impl From<DBError> for ServiceError {
    fn from(error: DBError) -> ServiceError {
        match error {
            DBError::NotFound => ServiceError::NotFound("Record".to_string()),
            DBError::DatabaseError(kind, info) => {
                let message = info.details().unwrap_or_else(|| info.message()).to_string();
                match kind {
                    DatabaseErrorKind::UniqueViolation => ServiceError::AlreadyPresent(message),
                    DatabaseErrorKind::ForeignKeyViolation => ServiceError::NotFound("Referenced record".to_string()),
                    _ => ServiceError::InternalServerError(format!("DB error, {:?} {}", kind, message)),
                }
            }
            err => ServiceError::InternalServerError(format!("DB error, {}", err)),
        }
    }
}

impl From<r2d2::Error> for ServiceError {
    fn from(error: r2d2::Error) -> ServiceError {
        ServiceError::InternalServerError(format!("Pool error: {}", error))
    }
}

impl From<BlockingError> for ServiceError {
    fn from(error: BlockingError) -> ServiceError {
        ServiceError::InternalServerError(format!("Blocking error: {}", error))
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(error: std::io::Error) -> ServiceError {
        ServiceError::InternalServerError(format!("IO error: {}", error))
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::InternalServerError(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ServiceError::BadRequest(_) => StatusCode::BAD_REQUEST,
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Unauthorized => StatusCode::FORBIDDEN,
            ServiceError::WrongPassword => StatusCode::UNAUTHORIZED,
            ServiceError::LoginRequired => StatusCode::UNAUTHORIZED,
            ServiceError::AlreadyPresent(_) => StatusCode::CONFLICT,
        }
    }

    fn error_response(&self) -> HttpResponse {
        let message = match self {
            ServiceError::InternalServerError(x) => {
                error!("{}", x);
                "Database error".to_string()
            },
            ServiceError::BadRequest(x) => x.clone(),
            ServiceError::NotFound(x) => format!("{} not found", x),
            ServiceError::Unauthorized => "Higher authorization required".to_string(),
            ServiceError::WrongPassword => "Wrong password".to_string(),
            ServiceError::LoginRequired => "Login required".to_string(),
            ServiceError::AlreadyPresent(x) => format!("{} already present", x),
        };
        HttpResponse::build(self.status_code()).json(json!({ "error": message }))
    }
}

pub type ServiceResult<T> = Result<T, ServiceError>;

//! HTTP domain objects and the `xqd_req_*` / `xqd_resp_*` / `xqd_body_*` / `xqd_purge_*` ABI
//! surface (§4.4-§4.7, §4.12).

pub mod body;
pub mod purge;
pub mod request;
pub mod response;

pub use body::BodyObj;
pub use request::RequestObj;
pub use response::ResponseObj;

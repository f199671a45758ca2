pub use dmcore::net::{HttpClient, HttpMethod, HttpRequest, HttpResponse};
pub use sharemyshows_ureq_http_client::UreqHttpClient;

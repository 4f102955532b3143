use std::sync::OnceLock;

pub fn http_client() -> reqwest::Client {
    static CLIENT: OnceLock<reqwest::Client> = OnceLock::new();

    CLIENT
        .get_or_init(|| {
            reqwest::ClientBuilder::new()
                .user_agent(concat!("rtl-power-collector/", env!("CARGO_PKG_VERSION")))
                .build()
                .expect("failed to create http client")
        })
        .clone()
}

//! GitHub repository creation over the REST API.

use std::time::Duration;

use serde_json::json;

use datapub_core::types::AccessProtocol;
use datapub_core::{
    CreateRepository, HostedGitConfig, HostedGitProvider, ProviderError, RemoteDescriptor,
};

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Creates repositories under an organization with
/// `POST {api_url}/orgs/{org}/repos`.
pub struct GithubProvider {
    api_url: String,
    ssh_host: String,
    agent: ureq::Agent,
}

impl GithubProvider {
    pub fn new(api_url: impl Into<String>, ssh_host: impl Into<String>) -> Self {
        Self {
            api_url: api_url.into().trim_end_matches('/').to_string(),
            ssh_host: ssh_host.into(),
            agent: ureq::AgentBuilder::new().timeout(REQUEST_TIMEOUT).build(),
        }
    }

    pub fn from_config(config: &HostedGitConfig) -> Self {
        Self::new(&config.api_url, &config.ssh_host)
    }

    fn remote_url(&self, request: &CreateRepository) -> String {
        match request.access_protocol {
            AccessProtocol::Ssh => format!(
                "git@{}:{}/{}.git",
                self.ssh_host, request.organization, request.repo_name
            ),
            AccessProtocol::Https => format!(
                "https://{}/{}/{}.git",
                self.ssh_host, request.organization, request.repo_name
            ),
        }
    }
}

impl HostedGitProvider for GithubProvider {
    fn create_repository(
        &self,
        request: &CreateRepository,
    ) -> Result<RemoteDescriptor, ProviderError> {
        let url = format!("{}/orgs/{}/repos", self.api_url, request.organization);
        let descriptor = RemoteDescriptor {
            url: self.remote_url(request),
            access_protocol: Some(request.access_protocol),
        };

        let response = self
            .agent
            .post(&url)
            .set("Accept", "application/vnd.github+json")
            .set("Authorization", &format!("Bearer {}", request.token))
            .set("User-Agent", &request.login)
            .send_json(json!({ "name": request.repo_name }));

        match response {
            Ok(_) => {
                tracing::info!(repo = %request.repo_name, org = %request.organization, "created hosted-git repository");
                Ok(descriptor)
            }
            Err(ureq::Error::Status(422, response)) => {
                let body = response.into_string().unwrap_or_default();
                if body.contains("already exists") {
                    tracing::info!(repo = %request.repo_name, "hosted-git repository already exists; reusing");
                    Ok(descriptor)
                } else {
                    Err(ProviderError::Rejected {
                        status: 422,
                        message: body,
                    })
                }
            }
            Err(ureq::Error::Status(status, response)) => Err(ProviderError::Rejected {
                status,
                message: response.into_string().unwrap_or_default(),
            }),
            Err(ureq::Error::Transport(transport)) => {
                Err(ProviderError::Unreachable(transport.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::io::{BufRead, BufReader, Read, Write};
    use std::net::TcpListener;
    use std::thread::JoinHandle;

    use super::*;

    fn request(protocol: AccessProtocol) -> CreateRepository {
        CreateRepository {
            repo_name: "ds000001".into(),
            login: "openneuro-bot".into(),
            token: "ghp_test".into(),
            organization: "OpenNeuroDatasets".into(),
            access_protocol: protocol,
        }
    }

    /// Serve one HTTP response and hand back the raw request head + body.
    fn serve_once(status: &'static str, body: &'static str) -> (String, JoinHandle<String>) {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        let handle = std::thread::spawn(move || {
            let (stream, _) = listener.accept().expect("accept");
            let mut reader = BufReader::new(stream.try_clone().expect("clone"));
            let mut head = String::new();
            let mut content_length = 0usize;
            loop {
                let mut line = String::new();
                reader.read_line(&mut line).expect("read line");
                if let Some(value) = line.to_ascii_lowercase().strip_prefix("content-length:") {
                    content_length = value.trim().parse().unwrap_or(0);
                }
                let end = line == "\r\n" || line.is_empty();
                head.push_str(&line);
                if end {
                    break;
                }
            }
            let mut payload = vec![0u8; content_length];
            reader.read_exact(&mut payload).expect("read body");
            head.push_str(&String::from_utf8_lossy(&payload));

            let mut stream = stream;
            write!(
                stream,
                "HTTP/1.1 {status}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{body}",
                body.len()
            )
            .expect("write response");
            head
        });
        (format!("http://{addr}"), handle)
    }

    #[test]
    fn ssh_and_https_remote_urls() {
        let provider = GithubProvider::new("https://api.github.com/", "github.com");
        assert_eq!(
            provider.remote_url(&request(AccessProtocol::Ssh)),
            "git@github.com:OpenNeuroDatasets/ds000001.git"
        );
        assert_eq!(
            provider.remote_url(&request(AccessProtocol::Https)),
            "https://github.com/OpenNeuroDatasets/ds000001.git"
        );
    }

    #[test]
    fn created_repository_returns_ssh_descriptor() {
        let (api, server) = serve_once("201 Created", r#"{"name":"ds000001"}"#);
        let provider = GithubProvider::new(api, "github.com");
        let descriptor = provider
            .create_repository(&request(AccessProtocol::Ssh))
            .expect("create");
        assert_eq!(descriptor.url, "git@github.com:OpenNeuroDatasets/ds000001.git");

        let seen = server.join().expect("server");
        assert!(seen.starts_with("POST /orgs/OpenNeuroDatasets/repos"));
        assert!(seen.to_ascii_lowercase().contains("authorization: bearer ghp_test"));
        assert!(seen.contains(r#""name":"ds000001""#));
    }

    #[test]
    fn existing_repository_is_reused() {
        let (api, server) = serve_once(
            "422 Unprocessable Entity",
            r#"{"message":"Repository creation failed.","errors":[{"message":"name already exists on this account"}]}"#,
        );
        let provider = GithubProvider::new(api, "github.com");
        let descriptor = provider.create_repository(&request(AccessProtocol::Ssh));
        assert!(descriptor.is_ok());
        server.join().expect("server");
    }

    #[test]
    fn bad_credentials_are_rejected() {
        let (api, server) = serve_once("401 Unauthorized", r#"{"message":"Bad credentials"}"#);
        let provider = GithubProvider::new(api, "github.com");
        let err = provider
            .create_repository(&request(AccessProtocol::Ssh))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Rejected { status: 401, .. }));
        server.join().expect("server");
    }

    #[test]
    fn unreachable_api_is_transport_error() {
        let listener = TcpListener::bind("127.0.0.1:0").expect("bind");
        let addr = listener.local_addr().expect("addr");
        drop(listener);
        let provider = GithubProvider::new(format!("http://{addr}"), "github.com");
        let err = provider
            .create_repository(&request(AccessProtocol::Ssh))
            .unwrap_err();
        assert!(matches!(err, ProviderError::Unreachable(_)));
    }
}

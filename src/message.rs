//! Wire types carried over the queue (spec §6).
//!
//! `Operation` is the outermost envelope published to the `biomajdownload`
//! queue and consumed by the worker; it is encoded with `bincode` for a
//! compact binary body (the original protobuf schema is mirrored in spirit,
//! not in wire format — see DESIGN.md).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::domain::models::remote_file::RemoteFile;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OperationKind {
    List,
    Download,
    Process,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Protocol {
    Ftp,
    Ftps,
    Http,
    Https,
    DirectFtp,
    DirectFtps,
    DirectHttp,
    DirectHttps,
    Local,
    Rsync,
    Irods,
    Sftp,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HttpParse {
    pub dir_line: Option<String>,
    pub file_line: Option<String>,
    pub dir_name: Option<usize>,
    pub dir_date: Option<usize>,
    pub file_name: Option<usize>,
    pub file_date: Option<usize>,
    pub file_date_format: Option<String>,
    pub file_size: Option<usize>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RemoteFileSpec {
    pub protocol: Protocol,
    pub server: String,
    pub remote_dir: String,
    pub save_as: Option<String>,
    pub files: Vec<RemoteFile>,
    pub param: Vec<(String, String)>,
    pub matches: Vec<String>,
    pub http_parse: Option<HttpParse>,
    pub credentials: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxySpec {
    pub proxy: String,
    pub proxy_auth: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HttpMethod {
    Get,
    Post,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub bank: String,
    pub session: String,
    pub local_dir: String,
    pub timeout_download: Option<u64>,
    pub remote_file: RemoteFileSpec,
    pub proxy: Option<ProxySpec>,
    pub http_method: HttpMethod,
    pub options: HashMap<String, String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TraceContext {
    pub trace_id: String,
    pub span_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    pub kind: OperationKind,
    pub download: DownloadJob,
    pub trace: Option<TraceContext>,
}

impl Operation {
    pub fn encode(&self) -> crate::error::Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> crate::error::Result<Self> {
        Ok(bincode::deserialize(bytes)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_job() -> DownloadJob {
        DownloadJob {
            bank: "testbank".to_string(),
            session: "abc-123".to_string(),
            local_dir: "/tmp/testbank".to_string(),
            timeout_download: Some(300),
            remote_file: RemoteFileSpec {
                protocol: Protocol::Ftp,
                server: "ftp.example.org".to_string(),
                remote_dir: "/pub".to_string(),
                save_as: None,
                files: vec![],
                param: vec![],
                matches: vec!["^.*\\.gz$".to_string()],
                http_parse: None,
                credentials: None,
            },
            proxy: None,
            http_method: HttpMethod::Get,
            options: HashMap::new(),
        }
    }

    #[test]
    fn round_trips_through_bincode() {
        let op = Operation {
            kind: OperationKind::Download,
            download: sample_job(),
            trace: None,
        };
        let bytes = op.encode().unwrap();
        let decoded = Operation::decode(&bytes).unwrap();
        assert_eq!(decoded.download.bank, "testbank");
        assert_eq!(decoded.kind, OperationKind::Download);
    }
}

//! 六种报文种类的载荷形状与（反）序列化。
//!
//! spec.md §4.1 把字符串编码留给实现选择，只要求往返一致；这里选用 UTF-8
//! JSON（`serde_json`），与工作区既有的 `serde`/`serde_json` 依赖保持一致，
//! 换取比手写二进制结构体编解码小得多的实现面。

use forge_core::{BuildRequest, BuildResult, ConfigId, ConfigurationKey, NodeId, PacketKind, RequestId};
use serde::{Deserialize, Serialize};

use crate::error::WireError;

/// 节点向管理器报告「我的某个请求被这个新请求挡住了，请调度它」。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestBlockerPayload {
    pub parent_request_id: Option<RequestId>,
    pub blocked_request: BuildRequest,
}

/// 节点请求管理器解析/创建一个配置。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestConfigPayload {
    pub config_key: ConfigurationKey,
    pub explicitly_loaded: bool,
}

/// 管理器对 `RequestConfig` 的应答：解析出的 id 与当前的归属节点。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct RequestConfigResponsePayload {
    pub config_id: ConfigId,
    pub owning_node: Option<NodeId>,
}

/// 节点向管理器报告一次请求的结果。携带 `request_id` 是因为 `BuildResult`
/// 本身只按 `config_id` 归档（§3）——调度器需要请求 id 才能把结果接回
/// 正确的挂起链路（§4.5 `report_result`）。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResultPayload {
    pub request_id: RequestId,
    pub result: BuildResult,
}

/// 节点下线的原因（§4.6：按原因决定是否视为构建失败）。
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum NodeShutdownReason {
    Requested,
    Error,
    ConnectionFailed,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct NodeShutdownPayload {
    pub reason: NodeShutdownReason,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LogMessagePayload {
    pub level: LogLevel,
    pub message: String,
}

/// 管理器向节点下发一个待执行的请求（§4.5 `Schedule`/`ScheduleWithConfiguration`）。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduleRequestPayload {
    pub request: BuildRequest,
}

/// 管理器向节点推送一份节点尚不知道的配置体；必须先于引用它的
/// `ScheduleRequestPayload` 到达（§5 排序约束）。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PushConfigurationPayload {
    pub config_id: ConfigId,
    pub config_key: ConfigurationKey,
    pub explicitly_loaded: bool,
}

/// 管理器把此前阻塞某个请求的若干依赖结果发回对应节点，让它恢复执行
/// （§4.5 `ResumeExecution`）。
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ResumeExecutionPayload {
    pub resumed_request_id: RequestId,
    pub blocker_results: Vec<BuildResult>,
}

/// 把一个具体载荷编码为线路字节，附带其报文种类。
pub fn encode<T: Serialize>(kind: PacketKind, value: &T) -> Result<(PacketKind, Vec<u8>), WireError> {
    let bytes = serde_json::to_vec(value).map_err(|source| WireError::PayloadDecode {
        kind: kind_name(kind),
        source,
    })?;
    Ok((kind, bytes))
}

/// 按给定报文种类解析载荷字节。
pub fn decode<T: for<'de> Deserialize<'de>>(kind: PacketKind, bytes: &[u8]) -> Result<T, WireError> {
    serde_json::from_slice(bytes).map_err(|source| WireError::PayloadDecode {
        kind: kind_name(kind),
        source,
    })
}

fn kind_name(kind: PacketKind) -> &'static str {
    match kind {
        PacketKind::RequestBlocker => "RequestBlocker",
        PacketKind::RequestConfig => "RequestConfig",
        PacketKind::RequestConfigResponse => "RequestConfigResponse",
        PacketKind::Result => "Result",
        PacketKind::NodeShutdown => "NodeShutdown",
        PacketKind::LogMessage => "LogMessage",
        PacketKind::ScheduleRequest => "ScheduleRequest",
        PacketKind::PushConfiguration => "PushConfiguration",
        PacketKind::ResumeExecution => "ResumeExecution",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forge_core::{RequestFlags, SubmissionId};

    #[test]
    fn request_blocker_payload_round_trips() {
        let payload = RequestBlockerPayload {
            parent_request_id: Some(RequestId::from_raw(1)),
            blocked_request: BuildRequest {
                submission_id: SubmissionId::from_raw(0),
                request_id: RequestId::from_raw(2),
                config_id: ConfigId::from_raw(3),
                parent_request_id: Some(RequestId::from_raw(1)),
                targets: vec!["Build".into()],
                flags: RequestFlags::default(),
            },
        };
        let (kind, bytes) = encode(PacketKind::RequestBlocker, &payload).unwrap();
        let decoded: RequestBlockerPayload = decode(kind, &bytes).unwrap();
        assert_eq!(decoded.blocked_request.targets, vec!["Build".to_string()]);
    }

    #[test]
    fn decode_reports_which_kind_failed() {
        let err = decode::<RequestConfigPayload>(PacketKind::RequestConfig, b"not json").unwrap_err();
        match err {
            WireError::PayloadDecode { kind, .. } => assert_eq!(kind, "RequestConfig"),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn push_configuration_payload_round_trips() {
        let payload = PushConfigurationPayload {
            config_id: ConfigId::from_raw(9),
            config_key: ConfigurationKey::new("build.proj", "17.0", vec![("Platform".into(), "x64".into())]),
            explicitly_loaded: true,
        };
        let (kind, bytes) = encode(PacketKind::PushConfiguration, &payload).unwrap();
        let decoded: PushConfigurationPayload = decode(kind, &bytes).unwrap();
        assert_eq!(decoded.config_id, payload.config_id);
        assert!(decoded.explicitly_loaded);
    }
}

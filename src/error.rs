use std::net::IpAddr;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ScanError {
    #[error("目标格式无效: {0}")]
    Validation(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("设备搜索服务请求失败: {0}")]
    HostSearch(String),

    // 单个探测失败，只在探测层内部使用，最终都会降级为“未开放/未发现”
    #[error("探测失败: {target}:{port} - {reason}")]
    Probe {
        target: IpAddr,
        port: u16,
        reason: String,
    },

    #[error("设备扫描失败: {target} - {reason}")]
    Pipeline { target: IpAddr, reason: String },

    #[error("未解析出任何扫描目标")]
    NoTargets,

    #[error("全部 {attempted} 个设备扫描失败")]
    NoDevicesProcessed { attempted: usize },

    #[error("IO错误: {0}")]
    Io(#[from] std::io::Error),
}

impl ScanError {
    pub fn severity(&self) -> ErrorSeverity {
        match self {
            ScanError::Validation(_) | ScanError::Configuration(_) => ErrorSeverity::Critical,
            ScanError::NoTargets | ScanError::NoDevicesProcessed { .. } => ErrorSeverity::High,
            ScanError::HostSearch(_) | ScanError::Pipeline { .. } => ErrorSeverity::Medium,
            ScanError::Probe { .. } | ScanError::Io(_) => ErrorSeverity::Low,
        }
    }

    /// 致命错误只终止解析/整次扫描，其余错误在设备边界内被吸收
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            ScanError::Validation(_)
                | ScanError::Configuration(_)
                | ScanError::HostSearch(_)
                | ScanError::NoTargets
                | ScanError::NoDevicesProcessed { .. }
        )
    }

    pub fn user_hint(&self) -> Option<String> {
        match self {
            ScanError::Configuration(_) => {
                Some("提示：index-search 模式需要 --api-key 或 SHODAN_API_KEY 环境变量".to_string())
            }
            ScanError::Validation(_) => {
                Some("提示：支持 CIDR (10.0.0.0/24)、范围 (10.0.0.1-10.0.0.9) 或单个地址".to_string())
            }
            ScanError::NoDevicesProcessed { .. } => {
                Some("提示：尝试增加 --device-timeout 或检查目标网络是否可达".to_string())
            }
            ScanError::HostSearch(_) => Some("提示：检查 API Key 是否有效以及网络连接".to_string()),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Critical,
    High,
    Medium,
    Low,
}

impl ErrorSeverity {
    pub fn label(&self) -> &'static str {
        match self {
            ErrorSeverity::Critical => "严重",
            ErrorSeverity::High => "高",
            ErrorSeverity::Medium => "中",
            ErrorSeverity::Low => "低",
        }
    }
}

pub type Result<T> = std::result::Result<T, ScanError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(ScanError::Validation("x".into()).is_fatal());
        assert!(ScanError::Configuration("x".into()).is_fatal());
        assert!(ScanError::NoTargets.is_fatal());

        let probe = ScanError::Probe {
            target: "10.0.0.1".parse().unwrap(),
            port: 80,
            reason: "timeout".into(),
        };
        assert!(!probe.is_fatal());
        assert_eq!(probe.severity(), ErrorSeverity::Low);

        let pipeline = ScanError::Pipeline {
            target: "10.0.0.1".parse().unwrap(),
            reason: "boom".into(),
        };
        assert!(!pipeline.is_fatal());
    }

    #[test]
    fn test_io_conversion() {
        let err: ScanError = std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied").into();
        assert!(matches!(err, ScanError::Io(_)));
        assert!(!err.is_fatal());
        assert_eq!(err.severity().label(), "低");
        assert_eq!(ScanError::NoTargets.severity().label(), "高");
    }

    #[test]
    fn test_user_hint() {
        assert!(ScanError::Configuration("missing key".into()).user_hint().is_some());
        assert!(ScanError::NoTargets.user_hint().is_none());
    }
}

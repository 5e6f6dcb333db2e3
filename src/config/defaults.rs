use super::*;

impl Default for SerialConfig {
    fn default() -> Self {
        Self {
            device: "/dev/ttyUSB0".to_string(),
        }
    }
}

impl Default for MqttConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 1883,
            username: String::new(),
            password: String::new(),
            client_id: String::new(),
            keepalive_seconds: 60,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "INFO".to_string(),
            directory: "/var/log/wallbox-bridge".to_string(),
            file_name: "wallbox.log".to_string(),
            console_output: true,
            json_format: false,
            backup_count: 14,
        }
    }
}

use serde::Deserialize;

/// Top-level configuration settings for the application.
///
/// Covers the broker connection used by bus contexts, the broker server
/// binary, dispatch tuning and logging.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct Settings {
    pub broker: BrokerSettings,
    pub server: ServerSettings,
    pub dispatch: DispatchSettings,
    pub logging: LoggingSettings,
}

/// Which broker protocol bus contexts speak.
#[derive(Debug, Deserialize, Clone, Copy, Default, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransportKind {
    /// AMQP 0-9-1, e.g. RabbitMQ.
    #[default]
    Amqp,
    /// The fanbus broker server.
    WebSocket,
}

/// Where bus contexts connect to, and with which credentials.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct BrokerSettings {
    pub transport: TransportKind,
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

/// Configuration settings for the broker server.
///
/// Defines the address the server binds to and the credentials clients must
/// log in with.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct ServerSettings {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize, Clone, Default, PartialEq)]
pub struct DispatchSettings {
    /// Upper bound on unacknowledged deliveries per listening context.
    /// `None` leaves the transport default in place.
    pub max_concurrent_handlers: Option<u16>,
}

#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct LoggingSettings {
    pub level: String,
}

/// Partial configuration settings loaded from files or environment.
///
/// Allows partial specification of settings. Missing values can be filled using defaults.
#[derive(Debug, Deserialize, Default)]
pub struct PartialSettings {
    pub broker: Option<PartialBrokerSettings>,
    pub server: Option<PartialServerSettings>,
    pub dispatch: Option<PartialDispatchSettings>,
    pub logging: Option<PartialLoggingSettings>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialBrokerSettings {
    pub transport: Option<TransportKind>,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialDispatchSettings {
    pub max_concurrent_handlers: Option<u16>,
}

#[derive(Debug, Deserialize, Default)]
pub struct PartialLoggingSettings {
    pub level: Option<String>,
}

/// Provides default values for `Settings`.
///
/// Contexts target a stock local RabbitMQ: AMQP on `localhost:5672` with
/// `guest`/`guest`. The bundled broker server listens on port 7878.
impl Default for Settings {
    fn default() -> Self {
        Self {
            broker: BrokerSettings {
                transport: TransportKind::Amqp,
                host: "localhost".to_string(),
                port: 5672,
                username: "guest".to_string(),
                password: "guest".to_string(),
            },
            server: ServerSettings {
                host: "127.0.0.1".to_string(),
                port: 7878,
                username: "guest".to_string(),
                password: "guest".to_string(),
            },
            dispatch: DispatchSettings::default(),
            logging: LoggingSettings {
                level: "info".to_string(),
            },
        }
    }
}

impl PartialSettings {
    /// Fill every missing value from `defaults`.
    pub fn merge(self, defaults: Settings) -> Settings {
        let broker = self.broker.unwrap_or_default();
        let server = self.server.unwrap_or_default();
        let dispatch = self.dispatch.unwrap_or_default();
        let logging = self.logging.unwrap_or_default();

        Settings {
            broker: BrokerSettings {
                transport: broker.transport.unwrap_or(defaults.broker.transport),
                host: broker.host.unwrap_or(defaults.broker.host),
                port: broker.port.unwrap_or(defaults.broker.port),
                username: broker.username.unwrap_or(defaults.broker.username),
                password: broker.password.unwrap_or(defaults.broker.password),
            },
            server: ServerSettings {
                host: server.host.unwrap_or(defaults.server.host),
                port: server.port.unwrap_or(defaults.server.port),
                username: server.username.unwrap_or(defaults.server.username),
                password: server.password.unwrap_or(defaults.server.password),
            },
            dispatch: DispatchSettings {
                max_concurrent_handlers: dispatch
                    .max_concurrent_handlers
                    .or(defaults.dispatch.max_concurrent_handlers),
            },
            logging: LoggingSettings {
                level: logging.level.unwrap_or(defaults.logging.level),
            },
        }
    }
}

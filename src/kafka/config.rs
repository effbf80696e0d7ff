use quickchat_config::KafkaConfig;
use quickchat_error::AppResult;
use rdkafka::config::ClientConfig;
use tracing::info;

/// Connection settings shared by the producer and the consumer: bootstrap
/// servers plus the SSL/SASL combination selected by the configuration.
pub fn create_client_config(config: &KafkaConfig) -> AppResult<ClientConfig> {
    let mut client_config = ClientConfig::new();
    client_config.set("bootstrap.servers", &config.brokers);
    client_config.set("security.protocol", security_protocol(config));

    if config.ssl_enabled {
        info!("Enabling SSL/TLS for Kafka connection");
        if let Some(ca_location) = &config.ssl_ca_location {
            client_config.set("ssl.ca.location", ca_location);
        }
    }

    if let (Some(mechanism), Some(username), Some(password)) = (
        &config.sasl_mechanism,
        &config.sasl_username,
        &config.sasl_password,
    ) {
        info!(sasl_mechanism = %mechanism, "Configuring SASL authentication");
        client_config
            .set("sasl.mechanism", mechanism)
            .set("sasl.username", username)
            .set("sasl.password", password);
    }

    Ok(client_config)
}

fn security_protocol(config: &KafkaConfig) -> &'static str {
    let sasl = config.sasl_mechanism.is_some()
        && config.sasl_username.is_some()
        && config.sasl_password.is_some();

    match (sasl, config.ssl_enabled) {
        (true, true) => "sasl_ssl",
        (true, false) => "sasl_plaintext",
        (false, true) => "ssl",
        (false, false) => "plaintext",
    }
}

/// Producer settings: every append waits for the configured acks and is
/// idempotent, so broker retries never reorder a room's events.
pub fn producer_config(config: &KafkaConfig) -> AppResult<ClientConfig> {
    let mut client_config = create_client_config(config)?;
    client_config
        .set("acks", &config.producer_acks)
        .set(
            "enable.idempotence",
            config.producer_enable_idempotence.to_string(),
        )
        .set("max.in.flight.requests.per.connection", "5")
        .set("compression.type", &config.producer_compression)
        .set("linger.ms", config.producer_linger_ms.to_string())
        .set(
            "request.timeout.ms",
            config.producer_request_timeout_ms.to_string(),
        )
        .set(
            "message.timeout.ms",
            config.producer_delivery_timeout_ms.to_string(),
        );
    Ok(client_config)
}

/// Consumer settings: manual commits, and a fresh group starts from the
/// earliest retained record so a new deployment backfills the backlog.
pub fn consumer_config(config: &KafkaConfig) -> AppResult<ClientConfig> {
    let mut client_config = create_client_config(config)?;
    client_config
        .set("group.id", &config.consumer_group)
        .set("enable.auto.commit", "false")
        .set("auto.offset.reset", "earliest")
        .set("session.timeout.ms", "30000")
        .set("heartbeat.interval.ms", "3000")
        .set("max.poll.interval.ms", "300000");
    Ok(client_config)
}

//! MQTT 总线实现（rumqttc）。

use crate::subscriptions::Subscriptions;
use crate::{BusError, BusMessage, MessageBus, MessageHandler};
use async_trait::async_trait;
use rumqttc::{AsyncClient, Event, MqttOptions, Packet, QoS};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// MQTT 连接配置。
#[derive(Debug, Clone)]
pub struct MqttBusConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub client_id: String,
    pub qos: u8,
}

/// MQTT 总线客户端。
///
/// eventloop 在独立任务中轮询；每次收到 ConnAck 都会重新订阅已登记的模式，
/// 断线重连后订阅不会丢失。
#[derive(Clone)]
pub struct MqttBus {
    client: AsyncClient,
    qos: QoS,
    subscriptions: Arc<Subscriptions>,
}

impl MqttBus {
    pub fn connect(
        config: MqttBusConfig,
    ) -> Result<(Self, tokio::task::JoinHandle<()>), BusError> {
        if config.host.trim().is_empty() {
            return Err(BusError::Connect("mqtt host is empty".to_string()));
        }
        let mut options = MqttOptions::new(config.client_id.clone(), config.host, config.port);
        options.set_keep_alive(Duration::from_secs(30));
        if let (Some(username), Some(password)) = (config.username, config.password) {
            options.set_credentials(username, password);
        }
        let qos = qos_from_u8(config.qos);
        let (client, mut eventloop) = AsyncClient::new(options, 64);
        let subscriptions = Arc::new(Subscriptions::new());

        let loop_client = client.clone();
        let loop_subscriptions = subscriptions.clone();
        let client_id = config.client_id;
        let handle = tokio::spawn(async move {
            loop {
                match eventloop.poll().await {
                    Ok(Event::Incoming(Packet::ConnAck(_))) => {
                        let patterns = loop_subscriptions.patterns();
                        info!(
                            target: "domophone.bus",
                            client_id = %client_id,
                            subscriptions = patterns.len(),
                            "bus_connected"
                        );
                        for pattern in patterns {
                            // eventloop 任务内不能 await 请求通道，使用非阻塞订阅
                            if let Err(err) = loop_client.try_subscribe(pattern.clone(), qos) {
                                warn!(
                                    target: "domophone.bus",
                                    pattern = %pattern,
                                    error = %err,
                                    "bus_resubscribe_failed"
                                );
                            }
                        }
                    }
                    Ok(Event::Incoming(Packet::Publish(publish))) => {
                        let message = BusMessage::new(publish.topic.clone(), publish.payload.to_vec());
                        let delivered = loop_subscriptions.deliver(message);
                        debug!(
                            target: "domophone.bus",
                            topic = %publish.topic,
                            payload_size = publish.payload.len(),
                            handlers = delivered,
                            "bus_message_received"
                        );
                    }
                    Ok(_) => {}
                    Err(err) => {
                        warn!(target: "domophone.bus", error = %err, "bus_eventloop_error");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        });
        Ok((
            Self {
                client,
                qos,
                subscriptions,
            },
            handle,
        ))
    }
}

#[async_trait]
impl MessageBus for MqttBus {
    async fn publish(&self, topic: &str, payload: Vec<u8>) -> Result<(), BusError> {
        debug!(
            target: "domophone.bus",
            topic = %topic,
            payload_size = payload.len(),
            "bus_publish"
        );
        self.client
            .publish(topic, self.qos, false, payload)
            .await
            .map_err(|err| BusError::Publish(err.to_string()))
    }

    async fn subscribe(
        &self,
        pattern: &str,
        handler: Arc<dyn MessageHandler>,
    ) -> Result<(), BusError> {
        self.subscriptions.add(pattern, handler);
        self.client
            .subscribe(pattern, self.qos)
            .await
            .map_err(|err| BusError::Subscribe(err.to_string()))?;
        info!(target: "domophone.bus", pattern = %pattern, "bus_subscribed");
        Ok(())
    }
}

pub fn qos_from_u8(value: u8) -> QoS {
    match value {
        0 => QoS::AtMostOnce,
        1 => QoS::AtLeastOnce,
        2 => QoS::ExactlyOnce,
        _ => QoS::AtLeastOnce,
    }
}

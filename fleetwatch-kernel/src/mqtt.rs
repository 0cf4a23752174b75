use rumqttc::{AsyncClient, MqttOptions, QoS};
use std::time::Duration;
use tokio::task;
use tracing::{debug, info, warn};

use crate::config::MqttConf;
use crate::events::{EventReceiver, STATUS_TOPIC};

/// Forward every status event to the bus. Runs until the sender side is dropped.
pub fn spawn_status_publisher(conf: MqttConf, mut events: EventReceiver) -> task::JoinHandle<()> {
    task::spawn(async move {
        let mut opts = MqttOptions::new("fleetwatch-kernel", &conf.host, conf.port);
        opts.set_keep_alive(Duration::from_secs(15));
        let (client, mut eventloop) = AsyncClient::new(opts, 64);
        info!("[mqtt] publishing status events to {}:{} on {}", conf.host, conf.port, STATUS_TOPIC);

        loop {
            tokio::select! {
                event = events.recv() => {
                    let Some(event) = event else { break };
                    match serde_json::to_string(&event) {
                        Ok(payload) => {
                            if let Err(e) = client.publish(STATUS_TOPIC, QoS::AtLeastOnce, false, payload).await {
                                warn!("[mqtt] failed to publish: {:?}", e);
                            } else {
                                debug!("[mqtt] published {} {} -> {}", event.host_id, event.from, event.to);
                            }
                        }
                        Err(e) => warn!("[mqtt] cannot encode event: {}", e),
                    }
                },
                polled = eventloop.poll() => {
                    if let Err(e) = polled {
                        warn!("[mqtt] connection error: {:?}", e);
                        tokio::time::sleep(Duration::from_secs(2)).await;
                    }
                }
            }
        }
    })
}

/// Without a broker the events are still drained, so senders never pile up.
pub fn spawn_status_logger(mut events: EventReceiver) -> task::JoinHandle<()> {
    task::spawn(async move {
        while let Some(event) = events.recv().await {
            debug!("[events] {} {} -> {}", event.host_id, event.from, event.to);
        }
    })
}

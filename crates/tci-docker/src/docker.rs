use async_trait::async_trait;
use bollard::container::{
    AttachContainerOptions, Config, CreateContainerOptions, RemoveContainerOptions,
    ResizeContainerTtyOptions, StartContainerOptions, WaitContainerOptions,
};
use bollard::image::CreateImageOptions;
use bollard::models::{HostConfig, Mount, MountTypeEnum};
use bollard::Docker;
use futures::StreamExt;

use crate::engine::{ByteStream, ContainerSpec, Engine, EngineError, PullStream};
use crate::pull::{ProgressDetail, PullEvent};

/// [`Engine`] implementation backed by the docker daemon.
pub struct DockerEngine {
    docker: Docker,
}

impl DockerEngine {
    /// Obtain a client from the environment (`DOCKER_HOST` or the
    /// default local socket).
    pub fn from_env() -> Result<Self, EngineError> {
        Docker::connect_with_local_defaults()
            .map(|docker| Self { docker })
            .map_err(|e| EngineError::Connect(e.to_string()))
    }
}

#[async_trait]
impl Engine for DockerEngine {
    async fn image_pull(&self, image: &str) -> Result<PullStream, EngineError> {
        let options = CreateImageOptions {
            from_image: image.to_string(),
            ..Default::default()
        };

        let stream = self
            .docker
            .create_image(Some(options), None, None)
            .map(|item| match item {
                Ok(info) => Ok(PullEvent {
                    status: info.status,
                    id: info.id,
                    progress_detail: info.progress_detail.map(|d| ProgressDetail {
                        current: d.current.map(|v| v as f64),
                        total: d.total.map(|v| v as f64),
                    }),
                }),
                Err(e) => Err(EngineError::Pull(e.to_string())),
            })
            .boxed();

        Ok(stream)
    }

    async fn container_create(
        &self,
        name: &str,
        spec: &ContainerSpec,
    ) -> Result<String, EngineError> {
        let options = CreateContainerOptions {
            name: name.to_string(),
            platform: None,
        };

        let config = Config::<String> {
            image: Some(spec.image.clone()),
            cmd: Some(spec.command.clone()),
            env: Some(spec.env.clone()),
            working_dir: Some(spec.workdir.clone()),
            attach_stdin: Some(true),
            attach_stdout: Some(true),
            attach_stderr: Some(true),
            tty: Some(true),
            stop_signal: Some("KILL".to_string()),
            host_config: Some(HostConfig {
                privileged: Some(spec.privileged),
                auto_remove: Some(true),
                mounts: Some(vec![Mount {
                    typ: Some(MountTypeEnum::BIND),
                    source: Some(spec.bind_source.display().to_string()),
                    target: Some(spec.bind_target.clone()),
                    ..Default::default()
                }]),
                ..Default::default()
            }),
            ..Default::default()
        };

        self.docker
            .create_container(Some(options), config)
            .await
            .map(|resp| resp.id)
            .map_err(|e| EngineError::Api(e.to_string()))
    }

    async fn container_start(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .start_container(id, None::<StartContainerOptions<String>>)
            .await
            .map_err(|e| EngineError::Api(e.to_string()))
    }

    async fn container_attach(&self, id: &str) -> Result<ByteStream, EngineError> {
        let options = AttachContainerOptions::<String> {
            stream: Some(true),
            stdin: Some(true),
            stdout: Some(true),
            stderr: Some(true),
            ..Default::default()
        };

        let results = self
            .docker
            .attach_container(id, Some(options))
            .await
            .map_err(|e| EngineError::Api(e.to_string()))?;

        Ok(results
            .output
            .map(|item| match item {
                Ok(output) => Ok(output.into_bytes()),
                Err(e) => Err(EngineError::Api(e.to_string())),
            })
            .boxed())
    }

    async fn container_resize(
        &self,
        id: &str,
        height: u16,
        width: u16,
    ) -> Result<(), EngineError> {
        self.docker
            .resize_container_tty(id, ResizeContainerTtyOptions { height, width })
            .await
            .map_err(|e| EngineError::Api(e.to_string()))
    }

    async fn container_wait(&self, id: &str) -> Result<i64, EngineError> {
        let options = WaitContainerOptions {
            condition: "removed".to_string(),
        };

        let mut wait = self.docker.wait_container(id, Some(options));
        match wait.next().await {
            Some(Ok(resp)) => Ok(resp.status_code),
            // non-zero exits surface as a typed error on the wait stream
            Some(Err(bollard::errors::Error::DockerContainerWaitError { code, .. })) => Ok(code),
            Some(Err(e)) => Err(EngineError::Wait(e.to_string())),
            None => Err(EngineError::Wait(
                "wait stream ended without a result".to_string(),
            )),
        }
    }

    async fn container_remove(&self, id: &str) -> Result<(), EngineError> {
        self.docker
            .remove_container(
                id,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
            .map_err(|e| EngineError::Api(e.to_string()))
    }
}

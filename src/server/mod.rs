// Server module - Pingora HTTP server setup and startup checks

use pingora::server::configuration::Opt as ServerOpt;
use pingora_core::server::Server;

use crate::config::Config;
use crate::image_optimizer::check_tools;
use crate::proxy::ImgsrvProxy;

/// imgsrv HTTP server wrapper around Pingora
pub struct ImgsrvServer {
    config: Config,
    server_opt: ServerOpt,
}

impl ImgsrvServer {
    /// Create a new ImgsrvServer instance
    pub fn new(config: Config) -> Self {
        let mut server_opt = ServerOpt::default();
        server_opt.upgrade = false;
        server_opt.daemon = false;
        server_opt.nocapture = false;
        server_opt.test = false;
        server_opt.conf = None;

        Self { config, server_opt }
    }

    /// Get the application configuration
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Get the Pingora server options
    pub fn server_opt(&self) -> &ServerOpt {
        &self.server_opt
    }

    /// Startup checks that must pass before accepting traffic: the temp
    /// directory exists and every codec tool can be found.
    pub fn prepare(&self) -> Result<(), String> {
        let temp_dir = &self.config.temp_dir;
        std::fs::create_dir_all(temp_dir).map_err(|e| {
            format!(
                "Failed to create temp directory {}: {}",
                temp_dir.display(),
                e
            )
        })?;

        check_tools(&self.config.codecs.tools).map_err(|missing| {
            format!("Required codec tools not found: {}", missing.join(", "))
        })?;

        let allow_list = self.config.origin.build_allow_list()?;
        if allow_list.is_enabled() {
            tracing::info!(
                allow_list = %allow_list.status(),
                "Origin access control enabled"
            );
        } else {
            tracing::warn!(
                allow_list = %allow_list.status(),
                "No origin whitelist specified: allowing ALL origins"
            );
        }

        Ok(())
    }

    /// Build the Pingora server and block serving requests.
    pub fn run(self) -> Result<(), String> {
        let mut server = Server::new(Some(self.server_opt))
            .map_err(|e| format!("Failed to create Pingora server: {}", e))?;
        server.bootstrap();

        let proxy = ImgsrvProxy::new(&self.config)?;
        let mut proxy_service = pingora_proxy::http_proxy_service(&server.configuration, proxy);

        let listen_addr = self.config.server.listen_address();
        proxy_service.add_tcp(&listen_addr);
        proxy_service.threads = Some(self.config.server.threads);

        tracing::info!(
            address = %listen_addr,
            threads = self.config.server.threads,
            temp_dir = %self.config.temp_dir.display(),
            production = self.config.server.production,
            "Starting imgsrv"
        );

        server.add_service(proxy_service);
        server.run_forever()
    }
}

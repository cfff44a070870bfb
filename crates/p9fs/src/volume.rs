//! A mounted 9P export.

use std::sync::Arc;

use log::{info, warn};

use crate::{
    config::Config,
    file::FileHandle,
    info::FsInfo,
    resolver::{self, Location},
    session::Session,
    transport::{TcpTransport, Transport},
    utils::Result,
};

/// One attached export of one server.
///
/// Handles opened from a volume share its session; each owns its own fid.
pub struct Volume {
    session: Arc<Session>,
    root: Location,
    config: Config,
}

impl Volume {
    /// Connect over TCP and attach
    pub async fn mount(config: Config) -> Result<Volume> {
        Self::mount_with(Box::new(TcpTransport::new()), config).await
    }

    /// Configure and connect `transport`, negotiate the version, attach to the export.
    pub async fn mount_with(mut transport: Box<dyn Transport>, config: Config) -> Result<Volume> {
        config.validate()?;
        transport.configure(&config.endpoints()).await?;
        transport.connect().await?;

        let mut session = Session::new(transport, config.timeout);
        let attached = async {
            session.version(config.msize).await?;
            session.attach(&config.uname, &config.aname).await
        };
        let (fid, qid) = match attached.await {
            Ok(root) => root,
            Err(e) => {
                if let Err(close) = session.shutdown().await {
                    warn!("closing transport after failed mount: {}", close);
                }
                return Err(e);
            }
        };

        info!(
            "mounted {:?} on {} as {:?}, msize {}",
            config.aname,
            config.remote,
            config.uname,
            session.msize()
        );
        Ok(Volume {
            session: Arc::new(session),
            root: Location { fid, qid },
            config,
        })
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn session(&self) -> &Arc<Session> {
        &self.session
    }

    pub fn msize(&self) -> u32 {
        self.session.msize()
    }

    /// Fid and qid the export was attached with
    pub fn root(&self) -> Location {
        self.root
    }

    /// Handle on the export root, on its own clone of the attach fid
    pub async fn open_volume(&self) -> Result<FileHandle> {
        let location = resolver::resolve(&self.session, self.root, self.root, "").await?;
        FileHandle::establish(self.session.clone(), self.root, location, "/".to_owned()).await
    }

    /// Open `path`, relative paths taken from the root
    pub async fn open(&self, path: &str) -> Result<FileHandle> {
        let location = resolver::resolve(&self.session, self.root, self.root, path).await?;
        let path = if path.starts_with(['/', '\\']) {
            path.to_owned()
        } else {
            format!("/{}", path)
        };
        FileHandle::establish(self.session.clone(), self.root, location, path).await
    }

    pub async fn fs_info(&self) -> Result<FsInfo> {
        let statfs = self.session.statfs(self.root.fid).await?;
        Ok(FsInfo::from(&statfs))
    }

    /// Clunk the attach fid and close the transport.
    ///
    /// Handles still open become unusable.
    pub async fn unmount(self) -> Result<()> {
        let clunked = self.session.clunk(self.root.fid).await;
        self.session.shutdown().await?;
        info!("unmounted {:?} from {}", self.config.aname, self.config.remote);
        clunked
    }
}

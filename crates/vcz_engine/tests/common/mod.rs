//! Module to share types for integration tests.
//!
//! An integration test runs the engine the same way a client does: a
//! [`PieceManager`] shared by many peer tasks, and a [`Disk`] task writing
//! what they download. Peers are simulated, instead of a TCP connection they
//! read their blocks from the content of the torrent in memory.

use std::{path::PathBuf, sync::Arc, time::Duration};

use rand::{distributions::Alphanumeric, Rng};
use tokio::{sync::mpsc, time::sleep};
use tokio_util::sync::CancellationToken;
use vcz_engine::{
    bitfield::Bitfield,
    block::Block,
    config::Config,
    disk::Disk,
    error::Error,
    metainfo::{self, Info},
    piece::PieceHash,
    piece_manager::{PeerId, PieceManager},
};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .compact()
        .with_file(false)
        .without_time()
        .with_test_writer()
        .try_init();
}

/// A random directory inside the temporary dir.
pub fn tmp_dir() -> PathBuf {
    let name: String = rand::thread_rng()
        .sample_iter(&Alphanumeric)
        .take(20)
        .map(char::from)
        .collect();
    std::env::temp_dir().join(format!("vcz-{name}"))
}

/// A multi file torrent with random content, `files` are (length, path) and
/// the path components are separated by `/`.
pub fn multi_file_torrent(
    name: &str,
    piece_length: u32,
    files: &[(u64, &str)],
) -> (Info, Vec<u8>) {
    let size = files.iter().map(|(len, _)| *len).sum::<u64>() as usize;
    let mut rng = rand::thread_rng();
    let data: Vec<u8> = (0..size).map(|_| rng.gen()).collect();

    let info = Info {
        name: name.into(),
        piece_length,
        pieces: data
            .chunks(piece_length as usize)
            .flat_map(|c| PieceHash::digest(c).0)
            .collect(),
        file_length: None,
        files: Some(
            files
                .iter()
                .map(|(length, path)| metainfo::File {
                    length: *length,
                    path: path.split('/').map(String::from).collect(),
                })
                .collect(),
        ),
    };

    (info, data)
}

/// Create the engine and the disk of a torrent, the disk is not running yet.
pub async fn setup(
    info: &Info,
    config: &Config,
) -> Result<(Arc<PieceManager>, Disk), Error> {
    let (disk_tx, disk_rx) = mpsc::unbounded_channel();
    let disk = Disk::new(disk_rx, &config.download_dir, info).await?;
    let manager =
        PieceManager::new(info, config, disk_tx, CancellationToken::new())?;

    Ok((Arc::new(manager), disk))
}

#[derive(Clone, Copy, Debug)]
pub enum Behaviour {
    /// Sends every block it was asked for.
    Honest,
    /// Sends garbage for its first `blocks` requests, and then disconnects.
    Corrupt { blocks: usize },
    /// Requests `blocks` blocks, never answers, and disconnects.
    Leaves { blocks: usize },
}

/// A peer session that has the pieces of `bitfield`.
pub struct SimulatedPeer {
    pub id: PeerId,
    pub bitfield: Bitfield,
    pub behaviour: Behaviour,
    /// Delay of each answer.
    pub latency: Duration,
}

impl SimulatedPeer {
    /// Download until the engine says to stop, returns how many blocks were
    /// sent to the engine.
    pub async fn run(
        self,
        manager: Arc<PieceManager>,
        data: Arc<Vec<u8>>,
        piece_length: u32,
    ) -> usize {
        manager.update_piece_frequencies(self.id, self.bitfield);
        let mut sent = 0;
        let mut requested = 0;

        while manager.continue_download() {
            let Some(info) = manager.select_next_block(self.id) else {
                sleep(Duration::from_millis(1)).await;
                continue;
            };
            requested += 1;

            let start = info.index * piece_length as usize + info.begin as usize;
            let mut bytes = data[start..start + info.len as usize].to_vec();

            match self.behaviour {
                Behaviour::Leaves { blocks } => {
                    if requested >= blocks {
                        break;
                    }
                    continue;
                }
                Behaviour::Corrupt { blocks } => {
                    if requested > blocks {
                        break;
                    }
                    bytes.iter_mut().for_each(|b| *b = !*b);
                }
                Behaviour::Honest => {}
            }

            sleep(self.latency).await;
            manager.add_block(self.id, Block::new(info.index, info.begin, bytes));
            sent += 1;
        }

        manager.remove_peer(self.id);
        sent
    }
}

use std::sync::mpsc::{Receiver, RecvTimeoutError, Sender};
use std::sync::Arc;
use std::thread;
use std::thread::JoinHandle;

use log::{debug, error, info};

use crate::ingest::ingester::PartialBlock;
use crate::mem_store::table::InnerTable;
use crate::options::Options;

/// Messages accepted by the partial-block writer. Producers that pass a
/// `done` sender block on its paired receiver until the worker finishes the
/// drain cycle containing their message; the boolean says whether every
/// partial block of the cycle built successfully.
pub(crate) enum WriterMsg {
    Block {
        partial: PartialBlock,
        done: Option<Sender<bool>>,
    },
    Flush {
        done: Sender<bool>,
    },
}

/// Spawns the single consumer of the partial-block channel. It accumulates
/// partial blocks and drains them into the table when the queue reaches the
/// channel capacity, a message requests a synchronous flush, or the flush
/// interval elapses with work pending. Dropping all senders drains whatever
/// is queued and stops the thread.
pub(crate) fn spawn(
    table: Arc<InnerTable>,
    receiver: Receiver<WriterMsg>,
    opts: &Options,
) -> JoinHandle<()> {
    let max_partial_blocks = opts.max_partial_blocks;
    let flush_interval = opts.flush_interval;

    thread::spawn(move || {
        let mut queue: Vec<PartialBlock> = Vec::new();
        let mut waiters: Vec<Sender<bool>> = Vec::new();

        loop {
            match receiver.recv_timeout(flush_interval) {
                Ok(WriterMsg::Block { partial, done }) => {
                    queue.push(partial);
                    let sync = done.is_some();
                    if let Some(done) = done {
                        waiters.push(done);
                    }
                    if sync || queue.len() >= max_partial_blocks {
                        drain(&table, &mut queue, &mut waiters);
                    }
                }
                Ok(WriterMsg::Flush { done }) => {
                    waiters.push(done);
                    drain(&table, &mut queue, &mut waiters);
                }
                Err(RecvTimeoutError::Timeout) => {
                    if !queue.is_empty() {
                        debug!("flush interval elapsed, draining {} partial blocks", queue.len());
                        drain(&table, &mut queue, &mut waiters);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => {
                    drain(&table, &mut queue, &mut waiters);
                    info!("partial-block writer for table {} stopped", table.name());
                    return;
                }
            }
        }
    })
}

fn drain(table: &InnerTable, queue: &mut Vec<PartialBlock>, waiters: &mut Vec<Sender<bool>>) {
    let mut all_ok = true;
    for partial in queue.drain(..) {
        let row_count = partial.row_count;
        match partial.build_block() {
            Ok(block) => {
                table.add_block(block);
                debug!("built block of {} rows", row_count);
            }
            Err(e) => {
                error!("failed to build block: {}", e);
                all_ok = false;
            }
        }
    }
    for waiter in waiters.drain(..) {
        // a producer that gave up waiting is not an error
        let _ = waiter.send(all_ok);
    }
}

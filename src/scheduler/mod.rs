pub(crate) mod block_writer;

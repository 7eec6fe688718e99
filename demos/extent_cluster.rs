use bytes::Bytes;
use extent_raft::{
    DistExtentServer, ExtentStateMachine, FileType, LocalNetwork, RaftNode, RaftNodeConfig, RaftOptions, ReplicaId,
};
use std::error::Error;
use std::sync::Arc;
use tokio::time::{sleep, Duration};

/// Runs a three node cluster in one process, writes a file through it, then cuts off the leader
/// and keeps going on the remaining majority.
#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let logger = extent_raft::stdout_logger("demo");
    let network = LocalNetwork::new();
    let storage = tempfile::tempdir()?;
    let members: Vec<ReplicaId> = (1..=3).map(ReplicaId::new).collect();

    let mut nodes = Vec::with_capacity(members.len());
    let mut machines = Vec::with_capacity(members.len());
    for id in &members {
        let machine = ExtentStateMachine::new();
        let node = RaftNode::start(
            RaftNodeConfig {
                my_replica_id: *id,
                cluster_members: members.clone(),
                storage_directory: storage.path().join(format!("{:?}", id)),
                info_logger: logger.new(slog::o!("Node" => format!("{:?}", id))),
                options: RaftOptions::default(),
            },
            Arc::new(network.transport_for(*id)),
            machine.clone(),
        )?;
        network.register(*id, node.rpc_server());
        nodes.push(node);
        machines.push(machine);
    }

    let server = DistExtentServer::new(logger.clone(), nodes.iter().map(RaftNode::client).collect());
    let inode = server.create(FileType::File).await?;
    server.put(inode, Bytes::from_static(b"hello")).await?;
    slog::info!(logger, "Wrote inode {}: {:?}", inode, server.get(inode).await?);

    let mut leader = None;
    for node in &nodes {
        if node.client().is_leader().await?.0 {
            leader = Some(node.replica_id());
        }
    }
    let leader = leader.ok_or("no leader after a committed write")?;
    slog::info!(logger, "Cutting off leader {:?}", leader);
    network.disconnect(leader);

    // The cut off leader would accept the write and never commit it, so talk to the rest only.
    let majority = DistExtentServer::new(
        logger.clone(),
        nodes
            .iter()
            .filter(|node| node.replica_id() != leader)
            .map(RaftNode::client)
            .collect(),
    );
    majority.put(inode, Bytes::from_static(b"hello again")).await?;

    network.reconnect(leader);
    sleep(Duration::from_millis(500)).await;
    for (id, machine) in members.iter().zip(&machines) {
        slog::info!(logger, "{:?} sees {:?}", id, machine.get(inode));
    }

    for node in nodes {
        node.stop().await;
    }
    Ok(())
}

use bytes::Bytes;
use extent_raft::{
    ApplyError, Command, CommandWaitError, DistExtentServer, ExtentStateMachine, FileType, Index,
    InstallSnapshotArgs, LocalNetwork, RaftClient, RaftNode, RaftNodeConfig, RaftOptions, RaftTransport, ReplicaId,
    Role, Term,
};
use std::collections::HashMap;
use std::error::Error;
use std::sync::Arc;
use tempfile::TempDir;
use tokio::time::{sleep, Duration, Instant};

const WAIT: Duration = Duration::from_secs(5);

#[tokio::test]
async fn committed_put_reaches_every_replica() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3)?;
    let server = DistExtentServer::new(extent_raft::discard_logger(), cluster.clients());

    for expected in 2..=5 {
        assert_eq!(server.create(FileType::File).await?, expected);
    }
    server.put(5, Bytes::from_static(b"hello")).await?;
    assert_eq!(server.get(5).await?, Bytes::from_static(b"hello"));

    for id in cluster.ids() {
        cluster
            .wait_until(|| cluster.machine(id).get(5).ok() == Some(Bytes::from_static(b"hello")))
            .await;
    }
    cluster.assert_logs_match().await?;

    cluster.stop().await;
    Ok(())
}

#[tokio::test]
async fn partitioned_leader_steps_down_and_loses_uncommitted_entry() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3)?;
    let (old_leader, old_term) = cluster.wait_for_leader(None).await;

    let server = DistExtentServer::new(extent_raft::discard_logger(), cluster.clients());
    let inode = server.create(FileType::File).await?;
    server.put(inode, Bytes::from_static(b"before")).await?;

    cluster.network.disconnect(old_leader);
    let (new_leader, new_term) = cluster.wait_for_leader(Some(old_leader)).await;
    assert_ne!(new_leader, old_leader);
    assert!(new_term > old_term);

    // The old leader doesn't know it was deposed yet, so it still takes commands.
    let stale = cluster
        .client(old_leader)
        .new_command(Command::Put {
            inode,
            data: Bytes::from_static(b"stale"),
        })
        .await?;

    let majority = DistExtentServer::new(extent_raft::discard_logger(), cluster.clients_except(old_leader));
    majority.put(inode, Bytes::from_static(b"fresh")).await?;

    cluster.network.reconnect(old_leader);
    let old_client = cluster.client(old_leader);
    let deadline = Instant::now() + WAIT;
    loop {
        let status = old_client.status().await?;
        if status.role == Role::Follower && status.term >= new_term {
            break;
        }
        assert!(Instant::now() < deadline, "Old leader never stepped down: {:?}", status);
        sleep(Duration::from_millis(10)).await;
    }

    match stale.result.wait(WAIT).await {
        Err(CommandWaitError::Apply(ApplyError::Superseded { index })) => assert_eq!(index, stale.index),
        other => panic!("Expected the stale entry to be superseded, got {:?}", other),
    }

    for id in cluster.ids() {
        cluster
            .wait_until(|| cluster.machine(id).get(inode).ok() == Some(Bytes::from_static(b"fresh")))
            .await;
    }
    cluster.assert_logs_match().await?;

    cluster.stop().await;
    Ok(())
}

#[tokio::test]
async fn at_most_one_leader_per_term() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(5)?;
    let mut leaders: HashMap<Term, ReplicaId> = HashMap::new();

    let mut observe = |statuses: Vec<extent_raft::NodeStatus>| {
        for status in statuses.into_iter().filter(|s| s.role == Role::Leader) {
            let leader = leaders.entry(status.term).or_insert(status.id);
            assert_eq!(*leader, status.id, "Two leaders in {:?}", status.term);
        }
    };

    let (first_leader, _) = cluster.wait_for_leader(None).await;
    for round in 0..100 {
        if round == 30 {
            cluster.network.disconnect(first_leader);
        }
        if round == 70 {
            cluster.network.reconnect(first_leader);
        }
        observe(cluster.statuses().await?);
        sleep(Duration::from_millis(10)).await;
    }

    assert!(leaders.len() >= 2, "Expected a new election after the partition");
    cluster.stop().await;
    Ok(())
}

#[tokio::test]
async fn restarted_node_recovers_its_log() -> Result<(), Box<dyn Error>> {
    let mut cluster = TestCluster::start(3)?;
    let server = DistExtentServer::new(extent_raft::discard_logger(), cluster.clients());
    let inode = server.create(FileType::Symlink).await?;
    server.put(inode, Bytes::from_static(b"/target")).await?;

    let (leader, _) = cluster.wait_for_leader(None).await;
    let follower = cluster.ids().into_iter().find(|id| *id != leader).ok_or("no follower")?;
    cluster
        .wait_until(|| cluster.machine(follower).get(inode).is_ok())
        .await;
    let summary_before = cluster.client(follower).log_summary().await?;

    cluster.restart(follower).await?;

    let summary_after = cluster.client(follower).log_summary().await?;
    assert!(summary_after.len() >= summary_before.len());
    assert_eq!(summary_after[..summary_before.len()], summary_before[..]);

    // The fresh state machine is rebuilt by reapplying the log.
    cluster
        .wait_until(|| cluster.machine(follower).get(inode).ok() == Some(Bytes::from_static(b"/target")))
        .await;

    cluster.stop().await;
    Ok(())
}

#[tokio::test]
async fn install_snapshot_is_acknowledged_over_the_network() -> Result<(), Box<dyn Error>> {
    let cluster = TestCluster::start(3)?;
    let (leader, term) = cluster.wait_for_leader(None).await;
    let follower = cluster.ids().into_iter().find(|id| *id != leader).ok_or("no follower")?;

    let reply = cluster
        .network
        .transport_for(leader)
        .install_snapshot(
            follower,
            InstallSnapshotArgs {
                term,
                leader_id: leader,
                last_included_index: Index::new(0),
                last_included_term: Term::new(0),
                data: Bytes::new(),
            },
        )
        .await?;
    assert!(reply.success);
    assert!(reply.term >= term);

    cluster.stop().await;
    Ok(())
}

struct TestMember {
    node: RaftNode,
    machine: ExtentStateMachine,
    _storage: TempDir,
}

struct TestCluster {
    network: LocalNetwork,
    members: Vec<ReplicaId>,
    nodes: HashMap<ReplicaId, TestMember>,
}

impl TestCluster {
    fn start(num_members: u32) -> Result<Self, Box<dyn Error>> {
        let members: Vec<ReplicaId> = (0..num_members).map(ReplicaId::new).collect();
        let mut cluster = TestCluster {
            network: LocalNetwork::new(),
            members: members.clone(),
            nodes: HashMap::new(),
        };

        for id in members {
            let storage = tempfile::tempdir()?;
            cluster.start_member(id, storage)?;
        }
        Ok(cluster)
    }

    fn start_member(&mut self, id: ReplicaId, storage: TempDir) -> Result<(), Box<dyn Error>> {
        let machine = ExtentStateMachine::new();
        let node = RaftNode::start(
            RaftNodeConfig {
                my_replica_id: id,
                cluster_members: self.members.clone(),
                storage_directory: storage.path().to_path_buf(),
                info_logger: extent_raft::discard_logger(),
                options: fast_options(),
            },
            Arc::new(self.network.transport_for(id)),
            machine.clone(),
        )?;
        self.network.register(id, node.rpc_server());
        self.nodes.insert(
            id,
            TestMember {
                node,
                machine,
                _storage: storage,
            },
        );
        Ok(())
    }

    async fn restart(&mut self, id: ReplicaId) -> Result<(), Box<dyn Error>> {
        let member = self.nodes.remove(&id).ok_or("unknown member")?;
        self.network.unregister(id);
        member.node.stop().await;
        self.start_member(id, member._storage)
    }

    fn ids(&self) -> Vec<ReplicaId> {
        self.members.clone()
    }

    fn client(&self, id: ReplicaId) -> RaftClient {
        self.nodes[&id].node.client()
    }

    fn machine(&self, id: ReplicaId) -> &ExtentStateMachine {
        &self.nodes[&id].machine
    }

    fn clients(&self) -> Vec<RaftClient> {
        self.members.iter().map(|id| self.client(*id)).collect()
    }

    fn clients_except(&self, excluded: ReplicaId) -> Vec<RaftClient> {
        self.members
            .iter()
            .filter(|id| **id != excluded)
            .map(|id| self.client(*id))
            .collect()
    }

    async fn statuses(&self) -> Result<Vec<extent_raft::NodeStatus>, Box<dyn Error>> {
        let mut statuses = Vec::with_capacity(self.members.len());
        for client in self.clients() {
            statuses.push(client.status().await?);
        }
        Ok(statuses)
    }

    /// Leader id and term, ignoring whatever `excluded` believes about itself.
    async fn wait_for_leader(&self, excluded: Option<ReplicaId>) -> (ReplicaId, Term) {
        let deadline = Instant::now() + WAIT;
        loop {
            if let Ok(statuses) = self.statuses().await {
                let leader = statuses
                    .into_iter()
                    .filter(|status| Some(status.id) != excluded)
                    .find(|status| status.role == Role::Leader);
                if let Some(status) = leader {
                    return (status.id, status.term);
                }
            }
            assert!(Instant::now() < deadline, "Timeout waiting for leader election");
            sleep(Duration::from_millis(10)).await;
        }
    }

    async fn wait_until(&self, mut condition: impl FnMut() -> bool) {
        let deadline = Instant::now() + WAIT;
        while !condition() {
            assert!(Instant::now() < deadline, "Timeout waiting for condition");
            sleep(Duration::from_millis(10)).await;
        }
    }

    /// If two logs hold an entry with the same index and term, they agree on everything before it.
    async fn assert_logs_match(&self) -> Result<(), Box<dyn Error>> {
        let mut summaries: Vec<Vec<(Index, Term)>> = Vec::new();
        for client in self.clients() {
            summaries.push(client.log_summary().await?);
        }

        for a in &summaries {
            for b in &summaries {
                for (position, (entry_a, entry_b)) in a.iter().zip(b.iter()).enumerate() {
                    if entry_a == entry_b {
                        assert_eq!(a[..=position], b[..=position]);
                    }
                }
            }
        }
        Ok(())
    }

    async fn stop(self) {
        for (_, member) in self.nodes {
            member.node.stop().await;
        }
    }
}

fn fast_options() -> RaftOptions {
    RaftOptions {
        heartbeat_interval: Some(Duration::from_millis(20)),
        election_timeout_min: Some(Duration::from_millis(100)),
        election_timeout_max: Some(Duration::from_millis(200)),
        election_check_interval: Some(Duration::from_millis(5)),
        replication_interval: Some(Duration::from_millis(5)),
        apply_interval: Some(Duration::from_millis(2)),
        rpc_timeout: Some(Duration::from_millis(50)),
        rpc_worker_pool_size: None,
    }
}

#![allow(dead_code)]

use profq::profile::Profile;
use serde_json::json;

/// One thread, three functions, two markers.
pub fn small_profile() -> Profile {
    serde_json::from_value(json!({
        "meta": {
            "product": "Firefox",
            "platform": "Linux",
            "startTime": 1700000000000.0,
            "interval": 1.0,
            "version": 1
        },
        "libs": [{"name": "libxul.so", "path": "/opt/firefox/libxul.so"}],
        "funcs": [
            {"name": "main"},
            {"name": "run", "lib": 0, "file": "app.cpp", "line": 12},
            {"name": "idle"}
        ],
        "stacks": [
            {"func": 0},
            {"prefix": 0, "func": 1},
            {"prefix": 0, "func": 2}
        ],
        "threads": [{
            "name": "GeckoMain",
            "processName": "firefox",
            "pid": "1",
            "tid": "1",
            "isMainThread": true,
            "registerTime": 0.0,
            "samples": {
                "time": [0.0, 1.0, 2.0, 3.0, 4.0, 5.0],
                "stack": [1, 1, 2, 1, null, 1],
                "weight": [1.0, 1.0, 1.0, 2.0, 1.0, 1.0]
            },
            "markers": [
                {
                    "name": "Load",
                    "category": "Network",
                    "start": 0.5,
                    "end": 3.5,
                    "data": {"type": "Network", "status": "STOP"},
                    "stack": 1
                },
                {"name": "GC", "category": "GC", "start": 2.0}
            ]
        }]
    }))
    .expect("fixture profile is valid")
}
